//! Error types for page rendering

use std::time::Duration;

use thiserror::Error;

/// Result type alias for rendering operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching and compacting a page
#[derive(Debug, Error)]
pub enum Error {
    /// A fetch did not complete in time
    #[error("fetch of {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// Upstream answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    /// Transport-level fetch failure
    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// SVG asset rejected
    #[error("SVG rejected: {0}")]
    Svg(String),

    #[error("payload error: {0}")]
    Protocol(#[from] surf_protocol::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Fetch(e.to_string())
    }
}
