// crates/ctx-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, warn};

/// API keys and provider endpoints loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI API key (OPENAI_API_KEY)
    pub openai: Option<String>,
    /// Ollama host, e.g. http://localhost:11434 (OLLAMA_HOST)
    pub ollama: Option<String>,
}

impl ApiKeys {
    /// Load provider credentials from environment variables.
    ///
    /// Set `CTX_SYS_DISABLE_PROVIDERS=1` to suppress all providers (forces
    /// template/keyword fallbacks everywhere).
    pub fn from_env() -> Self {
        if parse_bool_env("CTX_SYS_DISABLE_PROVIDERS").unwrap_or(false) {
            debug!("CTX_SYS_DISABLE_PROVIDERS is set - providers disabled, using fallbacks");
            return Self::default();
        }

        let keys = Self {
            openai: read_key("OPENAI_API_KEY"),
            ollama: read_key("OLLAMA_HOST"),
        };
        if keys.openai.is_none() && keys.ollama.is_none() {
            warn!("No provider configured - semantic search and summarization degrade to fallbacks");
        }
        keys
    }

    /// Check if any embedding provider is available.
    pub fn has_embeddings(&self) -> bool {
        self.openai.is_some() || self.ollama.is_some()
    }
}

/// Read a single value from environment, filtering empty strings.
fn read_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

fn parse_bool_env(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Tunable engine parameters with the documented defaults.
///
/// Everything here can be overridden per-call through the respective option
/// structs; the config only supplies defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database file location (CTX_SYS_DB, default ~/.ctx-sys/ctx-sys.db)
    pub db_path: PathBuf,
    /// Maximum file size the indexer will read (bytes)
    pub max_file_size: u64,
    /// Maximum symbol entities extracted per file
    pub max_entities_per_file: usize,
    /// Files per indexer batch
    pub file_batch_size: usize,
    /// Persist an indexer checkpoint every N batches
    pub checkpoint_interval: usize,
    /// Entity content truncation threshold (lines)
    pub max_content_lines: usize,
    /// Chunking window size (chars)
    pub chunk_max_chars: usize,
    /// Chunking overlap (chars)
    pub chunk_overlap_chars: usize,
    /// Minimum trailing chunk size before merging into predecessor
    pub chunk_min_chars: usize,
    /// Watcher debounce window (ms)
    pub debounce_ms: u64,
    /// Reindex automatically on watcher events
    pub auto_reindex: bool,
    /// Messages before a session auto-archives
    pub max_active_messages: usize,
    /// Auto-archive sessions that reach max_active_messages
    pub auto_summarize: bool,
    /// Default token budget for assembled context
    pub default_token_budget: usize,
    /// Embedding request timeout (seconds)
    pub embed_timeout_secs: u64,
    /// Summarization request timeout (seconds)
    pub summarize_timeout_secs: u64,
    /// Retries for transient summarization failures
    pub summarize_max_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_file_size: 1024 * 1024,
            max_entities_per_file: 100,
            file_batch_size: 50,
            checkpoint_interval: 5,
            max_content_lines: 500,
            chunk_max_chars: 1000,
            chunk_overlap_chars: 100,
            chunk_min_chars: 100,
            debounce_ms: 300,
            auto_reindex: true,
            max_active_messages: 200,
            auto_summarize: true,
            default_token_budget: 4000,
            embed_timeout_secs: 30,
            summarize_timeout_secs: 60,
            summarize_max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(path) = std::env::var("CTX_SYS_DB").ok().filter(|p| !p.is_empty()) {
            cfg.db_path = PathBuf::from(path);
        }
        if let Some(v) = parse_env("CTX_SYS_MAX_FILE_SIZE") {
            cfg.max_file_size = v;
        }
        if let Some(v) = parse_env("CTX_SYS_BATCH_SIZE") {
            cfg.file_batch_size = v;
        }
        if let Some(v) = parse_env("CTX_SYS_DEBOUNCE_MS") {
            cfg.debounce_ms = v;
        }
        if let Some(v) = parse_bool_env("CTX_SYS_AUTO_REINDEX") {
            cfg.auto_reindex = v;
        }
        if let Some(v) = parse_env("CTX_SYS_TOKEN_BUDGET") {
            cfg.default_token_budget = v;
        }
        cfg
    }
}

/// Default database location: ~/.ctx-sys/ctx-sys.db
fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ctx-sys")
        .join("ctx-sys.db")
}
