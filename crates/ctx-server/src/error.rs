// crates/ctx-server/src/error.rs
// Standardized error types for ctx-sys

use thiserror::Error;

/// Main error type for the ctx-sys library.
///
/// Variants map 1:1 to the error kinds reported through the facade envelope.
#[derive(Error, Debug)]
pub enum CtxError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using CtxError
pub type Result<T> = std::result::Result<T, CtxError>;

impl CtxError {
    /// Stable kind string for the facade envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            CtxError::NotFound(_) => "not_found",
            CtxError::InvalidInput(_) => "invalid_input",
            CtxError::Conflict(_) => "conflict",
            CtxError::Io(_) => "io",
            CtxError::Parse(_) => "parse",
            CtxError::ProviderUnavailable(_) => "provider_unavailable",
            CtxError::Timeout(_) => "timeout",
            CtxError::Cancelled => "cancelled",
            CtxError::Corruption(_) => "corruption",
            CtxError::Db(_) => "internal",
            CtxError::Json(_) => "invalid_input",
            CtxError::Http(_) => "io",
            CtxError::Git(_) => "io",
            CtxError::Internal(_) => "internal",
            CtxError::Anyhow(_) => "internal",
        }
    }

    /// Optional remediation hint surfaced alongside the message.
    pub fn hint(&self) -> Option<String> {
        match self {
            CtxError::NotFound(_) => None,
            CtxError::ProviderUnavailable(_) => {
                Some("configure OPENAI_API_KEY or OLLAMA_HOST, or retry later".to_string())
            }
            CtxError::Conflict(_) => Some("use a different name or delete the existing record".to_string()),
            _ => None,
        }
    }
}

impl From<String> for CtxError {
    fn from(s: String) -> Self {
        CtxError::Internal(s)
    }
}

impl From<tokio::task::JoinError> for CtxError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            CtxError::Cancelled
        } else {
            CtxError::Internal(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for CtxError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CtxError::Timeout("deadline elapsed".to_string())
    }
}
