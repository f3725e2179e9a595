//! Error types for the dnsurf engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving or fetching tunneled pages
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] surf_protocol::Error),

    /// Page render error
    #[error("render error: {0}")]
    Render(#[from] surf_render::Error),

    /// DNS transport error
    #[error("transport error: {0}")]
    Transport(#[from] surf_dns::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Assembled payload could not be decoded
    #[error("failed to decode page: {0}")]
    Decode(String),
}

impl Error {
    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_timeout(),
            Error::Render(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}
