//! Error types for DNS transport

use thiserror::Error;

/// Result type alias for DNS transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sending or answering tunnel queries
#[derive(Debug, Error)]
pub enum Error {
    /// DNS message or socket error
    #[error("DNS error: {0}")]
    Dns(String),

    /// No matching reply arrived in time
    #[error("DNS query timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] surf_protocol::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<hickory_proto::ProtoError> for Error {
    fn from(e: hickory_proto::ProtoError) -> Self {
        Error::Dns(e.to_string())
    }
}

/// Why a [`FragmentSource`](crate::FragmentSource) could not produce a fragment
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The upstream page did not load in time
    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("upstream failed: {0}")]
    Upstream(String),
}
