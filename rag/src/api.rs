//! Request and response shapes shared by the HTTP endpoints and the chat UI.

use serde::{Deserialize, Serialize};

use crate::build_prompt::Turn;
use crate::error::{ErrorKind, RagError};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub context: Vec<String>,
    pub feedback_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub feedback_id: u64,
    pub rating: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Present (and empty) when no context could be retrieved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

impl From<&RagError> for ErrorBody {
    fn from(err: &RagError) -> Self {
        let context = match err.kind() {
            ErrorKind::IndexUnavailable => Some(Vec::new()),
            _ => None,
        };
        Self {
            error: public_message(err),
            context,
        }
    }
}

/// Message safe to show to the person asking. Internal details stay in the logs.
pub fn public_message(err: &RagError) -> String {
    match err {
        RagError::InvalidInput(msg) => msg.clone(),
        RagError::RateLimited { .. } => {
            "Rate limit exceeded. Please wait before sending more queries.".to_string()
        }
        RagError::IndexUnavailable => {
            "Index not built. Run the index build before asking questions.".to_string()
        }
        RagError::UpstreamTimeout { .. } => {
            "The model took too long to respond. Please try again.".to_string()
        }
        RagError::UpstreamUnavailable { .. } => "The model backend is unavailable.".to_string(),
        RagError::BuildConflict { .. } => "An index build is already running.".to_string(),
        RagError::FeedbackNotFound(_) => "Feedback not found.".to_string(),
        _ => "Internal server error.".to_string(),
    }
}
