//! The jet peer engine.
//!
//! A [`Peer`] turns operations into JSON-RPC requests, correlates responses
//! with the requests that asked for them, enforces per-request timeouts, and
//! routes inbound `set`/`call` invocations to the states and methods it owns.
//!
//! None of the operations wait for the network. Preconditions are checked
//! synchronously; outcomes arrive later through callbacks, invoked from the
//! task that handled the response or the timeout.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use jet_rpc::protocol::method;
use jet_rpc::{Matcher, Request, Transport, timeout_secs};
use serde_json::{Map, Value, json};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::access::{MethodAccess, StateAccess};
use crate::callbacks::{FetchCallback, MethodCallback, ResponseCallback, StateCallback};
use crate::error::{PeerError, Result};
use crate::ids::{FetchId, IdGenerator};
use crate::lock;
use crate::pending::{PendingRequest, RequestTable, expire_after};

pub(crate) struct Inner<T> {
    pub(crate) transport: T,
    runtime: Handle,
    pub(crate) requests: RequestTable,
    pub(crate) fetches: Mutex<HashMap<FetchId, FetchCallback>>,
    /// Owned states; `None` marks a fetch-only state.
    pub(crate) states: Mutex<HashMap<String, Option<StateCallback>>>,
    pub(crate) methods: Mutex<HashMap<String, MethodCallback>>,
    request_ids: IdGenerator,
    fetch_ids: IdGenerator,
    closed: AtomicBool,
    listener: Mutex<Option<AbortHandle>>,
}

/// A jet peer bound to one transport.
///
/// Cheap to clone; clones share the same registries.
pub struct Peer<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Peer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn require_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(PeerError::EmptyPath);
    }
    Ok(())
}

impl<T: Transport> Peer<T> {
    /// Create a peer on top of `transport`.
    ///
    /// Timers and the inbound listener run on the tokio runtime this is
    /// called from.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::NoRuntime` when called outside a tokio runtime.
    pub fn new(transport: T) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| PeerError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                runtime,
                requests: Arc::new(Mutex::new(HashMap::new())),
                fetches: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                methods: Mutex::new(HashMap::new()),
                request_ids: IdGenerator::new(),
                fetch_ids: IdGenerator::new(),
                closed: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Connect the transport and start listening for inbound frames.
    ///
    /// `on_complete` is invoked once with the outcome. A failed attempt
    /// leaves the peer ready for another one. A connection that completes
    /// after [`close`](Self::close) is dropped and reported as `false`.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Closed` if the peer has been closed.
    pub fn connect<F>(&self, on_complete: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            match tokio::time::timeout(timeout, inner.transport.connect()).await {
                Ok(Ok(frames)) => {
                    if Inner::listen(&inner, frames) {
                        info!("Jet peer connected");
                        on_complete(true);
                    } else {
                        debug!("Jet peer closed while connecting, dropping connection");
                        inner.transport.disconnect();
                        on_complete(false);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Jet peer failed to connect: {}", e);
                    on_complete(false);
                }
                Err(_) => {
                    warn!("Jet peer connect timed out after {:?}", timeout);
                    on_complete(false);
                }
            }
        });
        Ok(())
    }

    /// Handle one inbound text frame.
    ///
    /// Transports that push frames themselves, instead of through the
    /// channel returned by [`Transport::connect`], call this directly.
    pub fn handle_frame(&self, frame: &str) {
        self.inner.handle_frame(frame);
    }

    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent.
    pub fn authenticate(
        &self,
        user: &str,
        password: &str,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let params = json!({ "user": user, "password": password });
        self.inner
            .execute(method::AUTHENTICATE, Some(params), callback, timeout)
    }

    /// Change the password of `user`.
    ///
    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent.
    pub fn passwd(
        &self,
        user: &str,
        password: &str,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let params = json!({ "user": user, "password": password });
        self.inner
            .execute(method::PASSWD, Some(params), callback, timeout)
    }

    /// Announce this peer's name to the daemon.
    ///
    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent.
    pub fn config(
        &self,
        peer_name: &str,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let params = json!({ "name": peer_name });
        self.inner
            .execute(method::CONFIG, Some(params), callback, timeout)
    }

    /// Ask the daemon to describe itself.
    ///
    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent.
    pub fn info(&self, callback: Option<ResponseCallback>, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        self.inner.execute(method::INFO, None, callback, timeout)
    }

    /// Ask the owner of `path` to take on `value`.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty or owned by this peer.
    pub fn set(
        &self,
        path: &str,
        value: Value,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;
        if lock(&self.inner.states).contains_key(path) {
            return Err(PeerError::OwnedState(path.to_string()));
        }

        let params = json!({
            "path": path,
            "value": value,
            "timeout": timeout_secs(timeout),
        });
        self.inner
            .execute(method::SET, Some(params), callback, timeout)
    }

    /// Publish a state owned by this peer.
    ///
    /// Without a `state_callback` the state is fetch-only and the daemon
    /// rejects remote `set`s. `set_timeout` bounds how long the daemon waits
    /// for this peer to answer one.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty; fails if the request
    /// cannot be sent, in which case the state is not registered.
    // Mirrors the wire parameters one to one; a builder would only rename them
    #[allow(clippy::too_many_arguments)]
    pub fn add_state(
        &self,
        path: &str,
        value: Value,
        state_callback: Option<StateCallback>,
        set_timeout: Duration,
        access: Option<&StateAccess>,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;

        let mut params = Map::new();
        params.insert("path".to_string(), json!(path));
        params.insert("value".to_string(), value);
        params.insert("timeout".to_string(), json!(timeout_secs(set_timeout)));
        if state_callback.is_none() {
            params.insert("fetchOnly".to_string(), Value::Bool(true));
        }
        if let Some(access) = access.filter(|a| !a.is_empty()) {
            params.insert("access".to_string(), serde_json::to_value(access)?);
        }

        lock(&self.inner.states).insert(path.to_string(), state_callback);
        debug!("Registered state {}", path);

        self.inner
            .execute(method::ADD, Some(Value::Object(params)), callback, timeout)
            .inspect_err(|_| {
                lock(&self.inner.states).remove(path);
            })
    }

    /// Withdraw a state owned by this peer.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty.
    pub fn remove_state(
        &self,
        path: &str,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;
        if lock(&self.inner.states).remove(path).is_some() {
            debug!("Unregistered state {}", path);
        }

        self.inner
            .execute(method::REMOVE, Some(json!({ "path": path })), callback, timeout)
    }

    /// Publish a new value for a state owned by this peer.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty or not owned by this peer.
    pub fn change(
        &self,
        path: &str,
        value: Value,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;
        if !lock(&self.inner.states).contains_key(path) {
            return Err(PeerError::NotOwnedState(path.to_string()));
        }

        self.inner.change(path, value, callback, timeout)
    }

    /// Subscribe to the paths selected by `matcher`.
    ///
    /// Every notification for the subscription is handed to `on_event`
    /// until [`unfetch`](Self::unfetch) is called with the returned id.
    ///
    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent, in which
    /// case the subscription is not registered.
    pub fn fetch(
        &self,
        matcher: &Matcher,
        on_event: FetchCallback,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<FetchId> {
        self.ensure_open()?;
        let id = FetchId::new(self.inner.fetch_ids.next());

        let mut params = Map::new();
        if let Some(filter) = matcher.filter() {
            params.insert("path".to_string(), serde_json::to_value(filter)?);
        }
        params.insert("id".to_string(), json!(id));
        params.insert(
            "caseInsensitive".to_string(),
            Value::Bool(matcher.case_insensitive),
        );

        lock(&self.inner.fetches).insert(id, on_event);
        debug!("Registered fetch {}", id);

        self.inner
            .execute(method::FETCH, Some(Value::Object(params)), callback, timeout)
            .inspect_err(|_| {
                lock(&self.inner.fetches).remove(&id);
            })?;
        Ok(id)
    }

    /// End a subscription started by [`fetch`](Self::fetch).
    ///
    /// Notifications still in flight for `id` are discarded.
    ///
    /// # Errors
    ///
    /// Fails without sending if `id` is not an active subscription.
    pub fn unfetch(
        &self,
        id: FetchId,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        if lock(&self.inner.fetches).remove(&id).is_none() {
            return Err(PeerError::UnknownFetch(id));
        }
        debug!("Unregistered fetch {}", id);

        self.inner
            .execute(method::UNFETCH, Some(json!({ "id": id })), callback, timeout)
    }

    /// One-shot snapshot of the states selected by `matcher`.
    ///
    /// # Errors
    ///
    /// Fails if the peer is closed or the request cannot be sent.
    pub fn get(
        &self,
        matcher: &Matcher,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut params = Map::new();
        if let Some(filter) = matcher.filter() {
            params.insert("path".to_string(), serde_json::to_value(filter)?);
        }
        params.insert(
            "caseInsensitive".to_string(),
            Value::Bool(matcher.case_insensitive),
        );

        self.inner
            .execute(method::GET, Some(Value::Object(params)), callback, timeout)
    }

    /// Call a method owned by another peer.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty or a method this peer owns.
    pub fn call(
        &self,
        path: &str,
        args: Option<Value>,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;
        if lock(&self.inner.methods).contains_key(path) {
            return Err(PeerError::OwnedMethod(path.to_string()));
        }

        let mut params = Map::new();
        params.insert("path".to_string(), json!(path));
        if let Some(args) = args {
            params.insert("args".to_string(), args);
        }
        params.insert("timeout".to_string(), json!(timeout_secs(timeout)));

        self.inner
            .execute(method::CALL, Some(Value::Object(params)), callback, timeout)
    }

    /// Publish a method owned by this peer.
    ///
    /// `call_timeout` bounds how long the daemon waits for this peer to
    /// answer one call.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty; fails if the request
    /// cannot be sent, in which case the method is not registered.
    pub fn add_method(
        &self,
        path: &str,
        method_callback: MethodCallback,
        call_timeout: Duration,
        access: Option<&MethodAccess>,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;

        let mut params = Map::new();
        params.insert("path".to_string(), json!(path));
        params.insert("timeout".to_string(), json!(timeout_secs(call_timeout)));
        if let Some(access) = access.filter(|a| !a.is_empty()) {
            params.insert("access".to_string(), serde_json::to_value(access)?);
        }

        lock(&self.inner.methods).insert(path.to_string(), method_callback);
        debug!("Registered method {}", path);

        self.inner
            .execute(method::ADD, Some(Value::Object(params)), callback, timeout)
            .inspect_err(|_| {
                lock(&self.inner.methods).remove(path);
            })
    }

    /// Withdraw a method owned by this peer.
    ///
    /// # Errors
    ///
    /// Fails without sending if `path` is empty.
    pub fn remove_method(
        &self,
        path: &str,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        require_path(path)?;
        if lock(&self.inner.methods).remove(path).is_some() {
            debug!("Unregistered method {}", path);
        }

        self.inner
            .execute(method::REMOVE, Some(json!({ "path": path })), callback, timeout)
    }

    /// Tear down everything this peer owns, then disconnect.
    ///
    /// Sends `remove` for every owned state and method and `unfetch` for
    /// every subscription, completes every pending request with
    /// `completed == false` and [`closed_response`](crate::closed_response),
    /// and disconnects the transport. The peer cannot be used afterwards.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Closed` if the peer was already closed; nothing
    /// is sent in that case.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        info!("Closing jet peer");
        self.inner.teardown();
        Ok(())
    }

    /// Same as [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Closed` if the peer was already closed.
    pub fn disconnect(&self) -> Result<()> {
        self.close()
    }

    /// Paths of the states this peer owns.
    #[must_use]
    pub fn owned_states(&self) -> Vec<String> {
        lock(&self.inner.states).keys().cloned().collect()
    }

    /// Paths of the methods this peer owns.
    #[must_use]
    pub fn owned_methods(&self) -> Vec<String> {
        lock(&self.inner.methods).keys().cloned().collect()
    }

    #[must_use]
    pub fn active_fetches(&self) -> Vec<FetchId> {
        lock(&self.inner.fetches).keys().copied().collect()
    }

    /// Number of requests still waiting for a response or a timeout.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.requests).len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        Ok(())
    }
}

impl<T: Transport> Inner<T> {
    /// Build, register and send one request.
    ///
    /// A request gets an id, a pending entry and a timer only when a
    /// callback wants its response.
    pub(crate) fn execute(
        &self,
        method: &'static str,
        params: Option<Value>,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        let Some(callback) = callback else {
            let text = serde_json::to_string(&Request::notification(method, params))?;
            trace!("Sending {}: {}", method, text);
            return Ok(self.transport.send(text)?);
        };

        let id = self.request_ids.next();
        let text = serde_json::to_string(&Request::new(method, params, id.into()))?;
        {
            let mut requests = lock(&self.requests);
            let timer = self
                .runtime
                .spawn(expire_after(Arc::clone(&self.requests), id, timeout));
            requests.insert(
                id,
                PendingRequest::new(id, method, text.clone(), callback, timer.abort_handle()),
            );
        }

        trace!("[{}] Sending {}: {}", id, method, text);
        if let Err(e) = self.transport.send(text) {
            let pending = lock(&self.requests).remove(&id);
            // Already claimed by the timer means the callback has its outcome.
            let Some(pending) = pending else {
                warn!("[{}] Failed to send {}: {}", id, method, e);
                return Ok(());
            };
            pending.cancel();
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) fn change(
        &self,
        path: &str,
        value: Value,
        callback: Option<ResponseCallback>,
        timeout: Duration,
    ) -> Result<()> {
        let params = json!({ "path": path, "value": value });
        self.execute(method::CHANGE, Some(params), callback, timeout)
    }

    /// Spawn the task feeding inbound frames into dispatch.
    ///
    /// Returns `false`, without spawning, once the peer is closed.
    fn listen(this: &Arc<Self>, mut frames: mpsc::Receiver<String>) -> bool {
        // Checked under the listener lock, which teardown takes after
        // setting `closed`.
        let mut listener = lock(&this.listener);
        if this.closed.load(Ordering::SeqCst) {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        let task = this.runtime.spawn(async move {
            while let Some(frame) = frames.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_frame(&frame);
            }
            debug!("Inbound frame channel closed");
        });

        if let Some(previous) = listener.replace(task.abort_handle()) {
            previous.abort();
        }
        true
    }

    fn teardown(&self) {
        let states: Vec<String> = lock(&self.states).drain().map(|(path, _)| path).collect();
        let methods: Vec<String> = lock(&self.methods).drain().map(|(path, _)| path).collect();
        let fetches: Vec<FetchId> = lock(&self.fetches).drain().map(|(id, _)| id).collect();

        for path in states.iter().chain(&methods) {
            let params = json!({ "path": path });
            if let Err(e) = self.execute(method::REMOVE, Some(params), None, Duration::ZERO) {
                debug!("Could not remove {} during teardown: {}", path, e);
            }
        }
        for id in fetches {
            let params = json!({ "id": id });
            if let Err(e) = self.execute(method::UNFETCH, Some(params), None, Duration::ZERO) {
                debug!("Could not unfetch {} during teardown: {}", id, e);
            }
        }

        let pending: Vec<PendingRequest> =
            lock(&self.requests).drain().map(|(_, p)| p).collect();
        for request in pending {
            if panic::catch_unwind(AssertUnwindSafe(|| request.abandon())).is_err() {
                warn!("Response callback panicked during teardown");
            }
        }

        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        self.transport.disconnect();
    }
}
