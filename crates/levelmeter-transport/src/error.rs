//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("Failed to connect to {0}")]
    ConnectionFailed(String),

    /// Connection dropped without the caller closing it.
    #[error("Connection to {url} lost: {reason}")]
    ConnectionLost { url: String, reason: String },

    /// Invalid stream URL.
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// Async runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(String),
}
