//! Error types for the sync server.

use thiserror::Error;
use tidesync_protocol::ProtocolError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A push carried more transactions than the server admits at once.
    #[error("too many transactions: {count} > {max}")]
    BatchTooLarge {
        /// Transactions in the request.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    /// A pushed transaction failed validation.
    #[error("{0}")]
    Validation(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Validation(_)
                | ServerError::BatchTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Json(e) => ServerError::InvalidRequest(e.to_string()),
            other => ServerError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Validation("missing id".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(ServerError::Storage("disk".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::BatchTooLarge { count: 3, max: 2 }.is_client_error());
    }

    #[test]
    fn protocol_errors_are_client_errors() {
        let err: ServerError = ProtocolError::InvalidAction("merge".into()).into();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("merge"));
    }
}
