//! Error types for the sync engine.

use crate::state::EngineState;
use thiserror::Error;
use tidesync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (unexpected response body).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server refused the pushed writes themselves (400, 422).
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// Server refused a push for carrying too many transactions (413).
    #[error("batch too large: {0}")]
    BatchTooLarge(String),

    /// Server failed to handle the request (5xx).
    #[error("server error: {0}")]
    ServerError(String),

    /// Local mirror failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite failure in the local mirror.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A local mutation failed validation.
    #[error("invalid transaction: {0}")]
    Validation(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The engine is not in a state that accepts the call.
    #[error("engine is not ready (state: {state:?})")]
    NotReady {
        /// Current state.
        state: EngineState,
    },

    /// The engine was stopped.
    #[error("engine stopped")]
    Stopped,

    /// Called outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A push kept failing until the retry budget ran out.
    #[error("push failed after {attempts} attempts: {message}")]
    PushFailed {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        message: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Returns a copy suitable for handing to one push waiter.
    pub(crate) fn for_waiter(&self) -> SyncError {
        match self {
            SyncError::PushFailed { attempts, message } => SyncError::PushFailed {
                attempts: *attempts,
                message: message.clone(),
            },
            SyncError::Rejected(message) => SyncError::Rejected(message.clone()),
            SyncError::Stopped => SyncError::Stopped,
            other => SyncError::PushFailed {
                attempts: 1,
                message: other.to_string(),
            },
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Json(e) => SyncError::Json(e),
            other => SyncError::Validation(other.to_string()),
        }
    }
}
