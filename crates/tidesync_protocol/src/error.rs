//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A transaction is missing a required field or carries an empty one.
    #[error("invalid transaction: {0}")]
    Validation(String),

    /// The action is not one of create, update or delete.
    #[error("unknown action: {0}")]
    InvalidAction(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns true if the error was caused by malformed client input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::Validation(_) | ProtocolError::InvalidAction(_)
        )
    }
}
