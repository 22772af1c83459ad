use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the store, the ranker and the retrieval read path.
///
/// Every variant propagates unchanged to the caller of `Retriever::search`;
/// nothing is downgraded into an empty "best effort" result.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Refusing to write an empty batch")]
    EmptyBatch,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No candidates matched {0}")]
    NoCandidates(String),

    #[error("{operation} exceeded its deadline of {limit:?}")]
    Timeout { operation: &'static str, limit: Duration },

    #[error("Invalid chunk '{id}': {reason}")]
    InvalidChunk { id: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl Error {
    pub fn invalid_chunk(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChunk { id: id.into(), reason: reason.into() }
    }

    /// Wraps any backend error as [`Error::Storage`].
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
