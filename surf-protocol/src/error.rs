//! Error types for the tunnel protocol

use thiserror::Error;

/// Result type alias for tunnel protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding tunnel data
#[derive(Debug, Error)]
pub enum Error {
    /// Query name does not have the tunnel label structure
    #[error("malformed query name: {0}")]
    MalformedQuery(String),

    /// Payload could not be serialized or compressed
    #[error("payload encode error: {0}")]
    Encode(String),

    /// Payload text could not be turned back into a page
    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
