//! Bookkeeping for requests awaiting a response.
//!
//! A `PendingRequest` lives in the open-request table from send until either
//! its response arrives or its timer fires. Whoever removes it from the table
//! owns it, and consuming it is the only way to reach the callback, so the
//! callback runs at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jet_rpc::RpcError;
use serde_json::{Value, json};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::callbacks::ResponseCallback;
use crate::lock;

pub(crate) type RequestTable = Arc<Mutex<HashMap<u64, PendingRequest>>>;

pub(crate) struct PendingRequest {
    id: u64,
    method: &'static str,
    message: String,
    callback: ResponseCallback,
    timer: AbortHandle,
}

impl PendingRequest {
    pub(crate) fn new(
        id: u64,
        method: &'static str,
        message: String,
        callback: ResponseCallback,
        timer: AbortHandle,
    ) -> Self {
        Self {
            id,
            method,
            message,
            callback,
            timer,
        }
    }

    /// Deliver the daemon's response.
    pub(crate) fn complete(self, response: Value) {
        self.timer.abort();
        debug!("[{}] {} completed", self.id, self.method);
        (self.callback)(true, response);
    }

    /// Deliver the synthetic timeout response.
    pub(crate) fn expire(self) {
        warn!(
            "[{}] {} timed out waiting for response: {}",
            self.id, self.method, self.message
        );
        (self.callback)(false, timeout_response());
    }

    /// Deliver the closed-peer response; the peer is tearing down.
    pub(crate) fn abandon(self) {
        self.timer.abort();
        debug!("[{}] {} abandoned on close", self.id, self.method);
        (self.callback)(false, closed_response());
    }

    /// Drop the request without invoking its callback.
    pub(crate) fn cancel(self) {
        self.timer.abort();
        debug!("[{}] {} cancelled", self.id, self.method);
    }
}

/// Body delivered to a response callback whose request timed out.
#[must_use]
pub fn timeout_response() -> Value {
    json!({ "error": RpcError::timeout() })
}

/// Body delivered to a response callback whose request was still open when
/// the peer closed.
#[must_use]
pub fn closed_response() -> Value {
    json!({ "error": RpcError::internal_error("peer closed before a response arrived") })
}

/// Timer task armed for every pending request.
pub(crate) async fn expire_after(requests: RequestTable, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let pending = lock(&requests).remove(&id);
    if let Some(pending) = pending {
        pending.expire();
    }
}
