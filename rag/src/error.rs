//! Error types for the RAG library.

use thiserror::Error;

/// Coarse classification used by front ends to pick a response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    RateLimited,
    NotFound,
    IndexUnavailable,
    UpstreamTimeout,
    UpstreamUnavailable,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum RagError {
    /// The caller sent something unusable (empty query, out-of-range rating).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limit exceeded for {identity}; retry in {retry_after_secs}s")]
    RateLimited {
        identity: String,
        retry_after_secs: u64,
    },

    /// No snapshot has been published for the client yet.
    #[error("index not built")]
    IndexUnavailable,

    #[error("{service} timed out: {message}")]
    UpstreamTimeout { service: String, message: String },

    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("an index build is already running for client '{client}'")]
    BuildConflict { client: String },

    #[error("feedback {0} not found")]
    FeedbackNotFound(u64),

    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidInput(_) => ErrorKind::Input,
            RagError::RateLimited { .. } => ErrorKind::RateLimited,
            RagError::IndexUnavailable => ErrorKind::IndexUnavailable,
            RagError::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            RagError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            RagError::BuildConflict { .. } => ErrorKind::Conflict,
            RagError::FeedbackNotFound(_) => ErrorKind::NotFound,
            RagError::DimensionMismatch { .. }
            | RagError::CorruptSnapshot(_)
            | RagError::Config(_)
            | RagError::Io(_)
            | RagError::Json(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unavailable(service: &str, message: impl Into<String>) -> Self {
        RagError::UpstreamUnavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        RagError::CorruptSnapshot(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
