//! Connection layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("No response: {0}")]
    NoResponse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Response frames kept failing their checksum
    #[error("Corrupted response: {0}")]
    Corrupted(String),

    #[error("Stream already active")]
    StreamActive,

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}
