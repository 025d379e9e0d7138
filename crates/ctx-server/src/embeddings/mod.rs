// embeddings/mod.rs
// Embedding providers and the chunk-embed-store pipeline

pub mod chunking;
mod ollama;
mod openai;
mod pipeline;

pub use chunking::{Chunk, ChunkOptions, ChunkSet, chunk_content, estimate_chunk_count};
pub use ollama::OllamaEmbeddings;
pub use openai::OpenAiEmbeddings;
pub use pipeline::{EmbedItem, EmbedReport, embed_entities, embed_query};

use crate::config::{ApiKeys, EngineConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Embedding provider capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded on every chunk row.
    fn model_id(&self) -> String;

    /// Fixed output dimensionality.
    fn dimensions(&self) -> usize;

    /// Native batch size: one sub-batch maps to one HTTP request, so a
    /// failure never discards earlier sub-batches.
    fn batch_size(&self) -> usize {
        64
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
    Ollama(OllamaEmbeddings),
}

/// Embedding client with automatic provider selection.
///
/// Priority: OpenAI (highest quality) > Ollama (local, no key needed).
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// Create a client from pre-loaded configuration. Returns None when no
    /// provider is configured; callers degrade to keyword-only retrieval.
    pub fn from_config(api_keys: &ApiKeys, config: &EngineConfig) -> Option<Self> {
        let timeout = Duration::from_secs(config.embed_timeout_secs);

        if let Some(api_key) = api_keys.openai.as_ref() {
            info!("Using OpenAI embeddings (text-embedding-3-small)");
            return Some(Self {
                backend: EmbeddingBackend::OpenAi(OpenAiEmbeddings::new(
                    api_key.clone(),
                    None,
                    timeout,
                )),
            });
        }

        if let Some(ollama_host) = api_keys.ollama.as_ref() {
            let client = OllamaEmbeddings::new(ollama_host.clone(), None, None, timeout);
            info!(
                model = client.model_name(),
                dimensions = client.dimensions(),
                "Using Ollama embeddings"
            );
            return Some(Self {
                backend: EmbeddingBackend::Ollama(client),
            });
        }

        None
    }

    /// Create a client from environment configuration.
    pub fn from_env(config: &EngineConfig) -> Option<Self> {
        Self::from_config(&ApiKeys::from_env(), config)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    fn model_id(&self) -> String {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.model_name().to_string(),
            EmbeddingBackend::Ollama(c) => c.model_name().to_string(),
        }
    }

    fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.dimensions(),
            EmbeddingBackend::Ollama(c) => c.dimensions(),
        }
    }

    fn batch_size(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::OpenAi(_) => openai::MAX_BATCH_SIZE,
            EmbeddingBackend::Ollama(_) => ollama::MAX_BATCH_SIZE,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed(text).await,
            EmbeddingBackend::Ollama(c) => c.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed_batch(texts).await,
            EmbeddingBackend::Ollama(c) => c.embed_batch(texts).await,
        }
    }
}
