//! Error types for the peer engine.
//!
//! Every variant except the wrapped JSON and transport errors is a local
//! precondition failure: nothing was sent.

use jet_rpc::TransportError;

use crate::ids::FetchId;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Path must not be empty")]
    EmptyPath,

    #[error("Don't call set() on a state you own, use change() instead: {0}")]
    OwnedState(String),

    #[error("Can't change a state you don't own: {0}")]
    NotOwnedState(String),

    #[error("Don't call() a method you own: {0}")]
    OwnedMethod(String),

    #[error("Unknown fetch id: {0}")]
    UnknownFetch(FetchId),

    #[error("Peer is closed")]
    Closed,

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, PeerError>;
