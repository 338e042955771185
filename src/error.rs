//! Error types for queue commands
//!
//! Precondition failures are surfaced to the caller and never retried.
//! External failures (tab, provider) never reach this type: the engine turns
//! them into item-level `failed` states instead.

use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Error taxonomy for lifecycle and command handling
#[derive(Debug, Error)]
pub enum QueueError {
    /// A precondition on the current runtime/items did not hold
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<Value>,
    },

    /// Referenced queue item does not exist
    #[error("Queue item not found: {0}")]
    NotFound(String),

    /// Persisted state could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else, with context
    #[error("{0}")]
    Internal(String),
}

impl QueueError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        QueueError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request_with(message: impl Into<String>, details: Value) -> Self {
        QueueError::BadRequest {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Stable error code reported on the command surface
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::BadRequest { .. } => "BAD_REQUEST",
            QueueError::NotFound(_) => "NOT_FOUND",
            QueueError::Store(_) | QueueError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        match self {
            QueueError::BadRequest { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}
