//! Error types for the live session engine

use thiserror::Error;

/// Result type alias for session engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a live session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Camera or frame compression error
    #[error("video error: {0}")]
    Video(String),

    /// Connection could not be opened or was lost
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized inbound frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool invocation failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Session credential could not be obtained
    #[error("token error: {0}")]
    Token(String),

    /// Session lifecycle error
    #[error("session error: {0}")]
    Session(String),

    /// A session is already running on this controller
    #[error("session already active")]
    SessionActive,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
