//! Inbound frame dispatch.
//!
//! Each frame holds one JSON object or a batch array of them. Every object
//! is classified on its own, in order:
//!
//! - numeric `method`: notification for the fetch with that id
//! - no `method`, numeric `id`: response to one of our requests
//! - anything else: a `set` or `call` routed to a state or method we own
//!
//! Nothing in here returns an error. Malformed input is logged and dropped,
//! and failures inside callbacks become JSON-RPC error responses. A panic
//! in an application callback is caught here so the listener keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use jet_rpc::{RequestId, Response, RpcError, Transport};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::callbacks::{MethodCallback, StateCallback};
use crate::ids::FetchId;
use crate::lock;
use crate::peer::Inner;

#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Notification(FetchId),
    Response(u64),
    Invocation,
    Discard,
}

fn classify(message: &Map<String, Value>) -> Inbound {
    match message.get("method") {
        Some(Value::Number(n)) => n
            .as_u64()
            .map_or(Inbound::Discard, |id| Inbound::Notification(FetchId::new(id))),
        None | Some(Value::Null) => match message.get("id") {
            Some(Value::Number(n)) => n.as_u64().map_or(Inbound::Discard, Inbound::Response),
            _ => Inbound::Invocation,
        },
        Some(_) => Inbound::Invocation,
    }
}

impl<T: Transport> Inner<T> {
    pub(crate) fn handle_frame(&self, frame: &str) {
        trace!("Handling frame: {}", frame);
        let parsed: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unparsable frame: {}", e);
                return;
            }
        };

        match parsed {
            Value::Object(message) => self.handle_message(message),
            Value::Array(batch) => {
                for item in batch {
                    match item {
                        Value::Object(message) => self.handle_message(message),
                        other => debug!("Skipping non-object batch element: {}", other),
                    }
                }
            }
            other => warn!("Discarding frame that is not an object or array: {}", other),
        }
    }

    fn handle_message(&self, mut message: Map<String, Value>) {
        match classify(&message) {
            Inbound::Notification(id) => self.handle_notification(id, message.remove("params")),
            Inbound::Response(id) => self.handle_response(id, Value::Object(message)),
            Inbound::Invocation => self.handle_invocation(message),
            Inbound::Discard => debug!("Discarding message with non-integer id: {:?}", message),
        }
    }

    fn handle_notification(&self, id: FetchId, params: Option<Value>) {
        let callback = lock(&self.fetches).get(&id).cloned();
        let Some(callback) = callback else {
            trace!("No fetch registered for {}, dropping notification", id);
            return;
        };
        let Some(params) = params else {
            debug!("Notification for fetch {} without params", id);
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(params))).is_err() {
            warn!("Fetch callback for {} panicked", id);
        }
    }

    fn handle_response(&self, id: u64, response: Value) {
        let pending = lock(&self.requests).remove(&id);
        match pending {
            Some(pending) => {
                if panic::catch_unwind(AssertUnwindSafe(|| pending.complete(response))).is_err() {
                    warn!("[{}] Response callback panicked", id);
                }
            }
            None => debug!("[{}] Response for unknown or expired request", id),
        }
    }

    fn handle_invocation(&self, mut message: Map<String, Value>) {
        let reply_id = message.get("id").and_then(RequestId::from_value);
        let path = match message.remove("method") {
            Some(Value::String(path)) if !path.is_empty() => path,
            _ => {
                self.reply(reply_id, Err(RpcError::method_not_found()));
                return;
            }
        };
        let params = message.remove("params");

        let state = lock(&self.states).get(&path).cloned();
        let outcome = if let Some(state) = state {
            self.invoke_state(&path, state, params)
        } else {
            let method = lock(&self.methods).get(&path).cloned();
            let Some(method) = method else {
                debug!("Invocation for {} which this peer does not own", path);
                return;
            };
            invoke_method(&path, &method, params)
        };

        self.reply(reply_id, outcome);
    }

    fn invoke_state(
        &self,
        path: &str,
        callback: Option<StateCallback>,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let Some(callback) = callback else {
            return Err(RpcError::invalid_request(format!(
                "State {path} is fetch-only"
            )));
        };
        let value = params
            .and_then(|mut params| params.get_mut("value").map(Value::take))
            .ok_or_else(|| RpcError::invalid_params("Missing 'value' in params"))?;

        if let Some(adopted) = guarded(path, || callback(path, value))? {
            debug!("State {} adopted a different value, publishing change", path);
            if let Err(e) = self.change(path, adopted, None, Duration::ZERO) {
                warn!("Failed to publish change for {}: {}", path, e);
            }
        }
        Ok(Value::Bool(true))
    }

    fn reply(&self, id: Option<RequestId>, outcome: Result<Value, RpcError>) {
        let Some(id) = id else {
            if let Err(e) = outcome {
                debug!("Not replying to notification that failed: {}", e);
            }
            return;
        };

        let response = Response::from_outcome(id, outcome);
        let text = match serde_json::to_string(&response) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize response: {}", e);
                return;
            }
        };
        trace!("Replying: {}", text);
        if let Err(e) = self.transport.send(text) {
            warn!("Failed to send response: {}", e);
        }
    }
}

fn invoke_method(
    path: &str,
    callback: &MethodCallback,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    let args = params.ok_or_else(|| RpcError::invalid_params("Missing params"))?;
    guarded(path, || callback(path, args))
}

/// Run an application callback, turning a panic into an internal error reply.
fn guarded<R>(
    path: &str,
    callback: impl FnOnce() -> Result<R, RpcError>,
) -> Result<R, RpcError> {
    panic::catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|_| {
        warn!("Callback for {} panicked", path);
        Err(RpcError::internal_error(format!("Callback for {path} panicked")))
    })
}
