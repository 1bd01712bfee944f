use std::time::Duration;

use thiserror::Error;

/// Faults raised while fetching clinical findings.
///
/// These never leave the retrieval boundary: [`crate::retrieve`] logs them and
/// substitutes [`crate::FALLBACK_FINDINGS`].
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector store not configured: {0}")]
    NotConfigured(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vector store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid vector store response: {0}")]
    InvalidResponse(String),

    #[error("no passages matched in {collection}/{namespace}")]
    NoMatches {
        collection: String,
        namespace: String,
    },
}

/// Faults raised by the generative model. These are not recovered.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("prompt blocked by provider: {0}")]
    Blocked(String),

    #[error("generation exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("generation ended unexpectedly")]
    Aborted,
}
