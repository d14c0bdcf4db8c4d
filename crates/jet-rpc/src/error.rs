//! Error types for the jet-rpc crate.

use crate::codec::CodecError;

/// Errors raised by a [`Transport`](crate::transport::Transport)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Disconnected,

    #[error("Connect timed out after {0} ms")]
    ConnectTimeout(u64),
}

/// Errors raised while loading a [`TransportConfig`](crate::config::TransportConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
