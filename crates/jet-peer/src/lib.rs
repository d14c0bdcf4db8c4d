//! Client peer for the jet protocol.
//!
//! A jet daemon keeps a registry of path-addressed *states* (remotely
//! settable values) and *methods* (remotely callable functions). Peers add
//! and remove their own, set and call other peers', and `fetch` subscribe to
//! sets of paths selected by a [`Matcher`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use jet_peer::{Matcher, Peer, StreamTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), jet_peer::PeerError> {
//! let transport = StreamTransport::new(TransportConfig::with_address("127.0.0.1:11122"));
//! let peer = Peer::new(transport)?;
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! peer.connect(move |ok| { let _ = tx.send(ok); }, Duration::from_secs(5))?;
//! if rx.await != Ok(true) {
//!     return Ok(());
//! }
//!
//! let id = peer.fetch(
//!     &Matcher::new().starts_with("theState"),
//!     Arc::new(|event: serde_json::Value| println!("fetch event: {event}")),
//!     None,
//!     Duration::from_secs(5),
//! )?;
//!
//! peer.set(
//!     "theState",
//!     serde_json::json!(42),
//!     Some(Box::new(|completed: bool, response: serde_json::Value| {
//!         println!("{completed}: {response}");
//!     })),
//!     Duration::from_secs(5),
//! )?;
//!
//! peer.unfetch(id, None, Duration::from_secs(5))?;
//! peer.close()?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod access;
pub mod callbacks;
mod dispatch;
pub mod error;
pub mod ids;
mod peer;
mod pending;

#[cfg(test)]
mod tests;

pub use access::{MethodAccess, StateAccess};
pub use callbacks::{FetchCallback, MethodCallback, ResponseCallback, StateCallback};
pub use error::{PeerError, Result};
pub use ids::FetchId;
pub use peer::Peer;
pub use pending::{closed_response, timeout_response};

pub use jet_rpc::{
    Matcher, PathFilter, RpcError, StreamTransport, Transport, TransportConfig, TransportError,
};

/// Lock a registry, recovering the data if a callback panicked while it was held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
