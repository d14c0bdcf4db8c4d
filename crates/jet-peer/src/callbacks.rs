//! Capabilities the application hands to the peer.
//!
//! The peer stores these and invokes them from whichever task handles the
//! matching event. Locks on the registries are never held while a callback
//! runs, so callbacks may call back into the peer.

use std::sync::Arc;

use jet_rpc::RpcError;
use serde_json::Value;

/// Receives the outcome of one request: `(completed, body)`.
///
/// Invoked exactly once: with `completed = true` and the daemon's response
/// object, or with `completed = false` and a synthetic timeout error.
pub type ResponseCallback = Box<dyn FnOnce(bool, Value) + Send + 'static>;

/// Handles a remote `set` on an owned state: `(path, value)`.
///
/// `Ok(Some(v))` adopts `v` instead of the requested value and publishes it
/// via `change`; `Ok(None)` accepts the value as is.
pub type StateCallback = Arc<dyn Fn(&str, Value) -> Result<Option<Value>, RpcError> + Send + Sync>;

/// Handles a remote `call` of an owned method: `(path, args) -> result`.
pub type MethodCallback = Arc<dyn Fn(&str, Value) -> Result<Value, RpcError> + Send + Sync>;

/// Receives the `params` of every notification for one fetch.
pub type FetchCallback = Arc<dyn Fn(Value) + Send + Sync>;
