//! The bridge handle.
//!
//! [`MlBridge`] owns one connection to the remote peer and exposes the three
//! cooperating parts: connection management, named event routing and
//! request/reply correlation. Results come back either as awaited futures
//! ("latent" calls that suspend the caller until the reply) or as
//! [`BridgeEvent`] notifications broadcast to every subscriber.

use ml_proto::{websocket_url, RawInput};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::connection::DriverHandle;
use crate::correlator::{Continuation, Correlator, Payload, RequestId};
use crate::decode;
use crate::error::{BridgeError, DecodeError};
use crate::events::{BridgeEvent, ConnectionState, ConnectionStatus, ScriptSession};
use crate::metrics;
use crate::router::{EventRouter, HandlerId};

/// Target function used for text and JSON inputs when none is given
pub const DEFAULT_JSON_FUNCTION: &str = "onJsonInput";

/// Target function used for raw float inputs when none is given
pub const DEFAULT_RAW_FUNCTION: &str = "onFloatArrayInput";

/// State shared between the handle and the connection driver
pub(crate) struct Core {
    pub(crate) config: BridgeConfig,
    pub(crate) router: EventRouter,
    pub(crate) correlator: Correlator,
    events: broadcast::Sender<BridgeEvent>,
    status: watch::Sender<ConnectionStatus>,
    session: Arc<watch::Sender<ScriptSession>>,
}

impl Core {
    fn new(config: BridgeConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (session, _) = watch::channel(ScriptSession::default());

        Self {
            correlator: Correlator::new(config.strict_replies),
            router: EventRouter::new(),
            config,
            events,
            status,
            session: Arc::new(session),
        }
    }

    /// Broadcast to subscribers; having none is fine
    pub(crate) fn publish(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn set_status(&self, state: ConnectionState, session_id: Option<String>) {
        self.status.send_replace(ConnectionStatus { state, session_id });
    }

    pub(crate) fn reset_session(&self) {
        self.session.send_replace(ScriptSession::NotRunning);
    }

    /// Built-in routes: script start notifications and peer log lines
    fn register_builtin_routes(&self) {
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        self.router
            .on(self.config.events.script_started.clone(), move |_, payload| {
                let name = decode::text_payload(payload);
                info!(script = %name, "Remote script started");
                session.send_replace(ScriptSession::Running { name: name.clone() });
                let _ = events.send(BridgeEvent::ScriptStarted(name));
            });

        let events = self.events.clone();
        self.router.on(self.config.events.log.clone(), move |_, payload| {
            let _ = events.send(BridgeEvent::Log(decode::text_payload(payload)));
        });
    }
}

struct Inner {
    core: Arc<Core>,
    driver: Mutex<Option<DriverHandle>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(driver) = driver.take() {
            driver.abort();
        }
    }
}

/// Client handle to a remote ML peer.
///
/// Cheap to clone; the connection is released when the last clone is
/// dropped or [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct MlBridge {
    inner: Arc<Inner>,
}

impl MlBridge {
    /// Create a bridge without connecting
    pub fn new(config: BridgeConfig) -> Self {
        metrics::describe_metrics();

        let core = Core::new(config);
        core.register_builtin_routes();

        Self {
            inner: Arc::new(Inner {
                core: Arc::new(core),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Create a bridge and connect to the configured address if
    /// `connect_on_start` is set. Must be called within a Tokio runtime.
    pub fn start(config: BridgeConfig) -> Self {
        let bridge = Self::new(config);
        if bridge.config().connect_on_start {
            let address = bridge.config().address.clone();
            bridge.connect(&address);
        }
        bridge
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core().config
    }

    fn core(&self) -> &Arc<Core> {
        &self.inner.core
    }

    fn driver(&self) -> MutexGuard<'_, Option<DriverHandle>> {
        self.inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    /// Start connecting to `address`.
    ///
    /// Returns immediately; the outcome is reported through
    /// [`BridgeEvent::Connected`], [`BridgeEvent::ReconnectAttempt`] and
    /// [`BridgeEvent::ConnectFailed`]. Does nothing if a connection is
    /// already running.
    pub fn connect(&self, address: &str) {
        let mut driver = self.driver();
        if driver.as_ref().is_some_and(|d| !d.is_finished()) {
            warn!(address = address, "Connect ignored, connection already running");
            return;
        }

        let url = match websocket_url(address) {
            Ok(url) => url,
            Err(e) => {
                warn!(address = address, error = %e, "Cannot connect to peer");
                self.core().publish(BridgeEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        info!(url = %url, "Connecting to peer");
        *driver = Some(DriverHandle::spawn(Arc::clone(self.core()), url));
    }

    /// Close the connection and wait for it to be released.
    ///
    /// Pending requests fail with [`BridgeError::ConnectionLost`]. Calling
    /// this while disconnected does nothing.
    pub async fn disconnect(&self) {
        let driver = self.driver().take();
        if let Some(driver) = driver {
            driver.close().await;
            info!("Bridge disconnected");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core().status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.core().status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Session id assigned by the peer, while connected
    pub fn session_id(&self) -> Option<String> {
        self.core().status.borrow().session_id.clone()
    }

    /// Watch connection state changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.core().status.subscribe()
    }

    /// Wait until connected and return the session id
    pub async fn wait_connected(&self, timeout: Duration) -> Result<String, BridgeError> {
        let mut status = self.watch_status();
        let wait = status.wait_for(|s| s.state == ConnectionState::Connected);
        let session_id = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(status)) => status.session_id.clone().ok_or(BridgeError::NotConnected),
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        };
        session_id
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to bridge notifications
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.core().events.subscribe()
    }

    /// Register a handler for a named inbound event. Handlers run on the
    /// connection task in registration order.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        self.core().router.on(event, handler)
    }

    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.core().router.off(event, id)
    }

    pub fn script_session(&self) -> ScriptSession {
        self.core().session.borrow().clone()
    }

    pub fn is_script_running(&self) -> bool {
        self.core().session.borrow().is_running()
    }

    /// Watch script session changes
    pub fn watch_script_session(&self) -> watch::Receiver<ScriptSession> {
        self.core().session.subscribe()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Send `payload` to `target_function` under `event` and fire
    /// `continuation` with the first reply entry.
    ///
    /// An empty reply array never invokes the continuation unless strict
    /// replies are enabled. Without a running connection the continuation
    /// fires immediately with [`BridgeError::NotConnected`]; a dropped
    /// connection fires it with [`BridgeError::ConnectionLost`].
    pub fn send(
        &self,
        event: &str,
        target_function: &str,
        payload: Payload,
        continuation: Continuation,
    ) -> RequestId {
        let correlator = &self.core().correlator;
        let (id, frame) = correlator.register(event, target_function, payload, continuation);

        let queued = self.driver().as_ref().is_some_and(|driver| driver.send(frame));
        if !queued {
            warn!(request_id = id, target_function = target_function, "Send while not connected");
            metrics::record_dropped("not_connected");
            correlator.fail(id, BridgeError::NotConnected);
        }
        id
    }

    /// Ask the peer to start a script. There is no reply; completion shows
    /// up as [`BridgeEvent::ScriptStarted`].
    pub fn start_script(&self, name: &str) -> Result<(), BridgeError> {
        let frame = ml_proto::Frame::event(self.config().events.start_script.clone(), name);
        let queued = self.driver().as_ref().is_some_and(|driver| driver.send(frame));
        if queued {
            info!(script = name, "Start script requested");
            Ok(())
        } else {
            warn!(script = name, "Start script while not connected");
            Err(BridgeError::NotConnected)
        }
    }

    /// Number of requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.core().correlator.pending_count()
    }

    /// Text input, result broadcast as [`BridgeEvent::InputResult`]
    pub fn send_string_input(&self, input: &str, target_function: &str) -> RequestId {
        let events = self.core().events.clone();
        let function = target_function.to_string();
        self.notify(
            Payload::Text(input.to_string()),
            target_function,
            |value| Ok(decode::text_reply(value)),
            move |result| {
                let _ = events.send(BridgeEvent::InputResult {
                    result,
                    target_function: function,
                });
            },
        )
    }

    /// Text input, awaiting the text reply
    pub async fn send_string_input_await(
        &self,
        input: &str,
        target_function: &str,
    ) -> Result<String, BridgeError> {
        self.latent(Payload::Text(input.to_string()), target_function, |value| {
            Ok(decode::text_reply(value))
        })
        .await
    }

    /// Structured input, awaiting the structured reply
    pub async fn send_json_input(
        &self,
        input: Value,
        target_function: &str,
    ) -> Result<Value, BridgeError> {
        self.latent(Payload::Json(input), target_function, decode::json_reply)
            .await
    }

    /// Raw float input, result broadcast as [`BridgeEvent::RawInputResult`]
    pub fn send_raw_input(&self, input: Vec<f32>, target_function: &str) -> RequestId {
        let events = self.core().events.clone();
        self.notify(
            Payload::Raw(input),
            target_function,
            decode::raw_reply,
            move |raw: RawInput| {
                let _ = events.send(BridgeEvent::RawInputResult {
                    data: raw.input_data,
                    target_function: raw.target_function,
                });
            },
        )
    }

    /// Raw float input, awaiting the returned floats
    pub async fn send_raw_input_await(
        &self,
        input: Vec<f32>,
        target_function: &str,
    ) -> Result<Vec<f32>, BridgeError> {
        self.latent(Payload::Raw(input), target_function, |value| {
            decode::raw_reply(value).map(|raw| raw.input_data)
        })
        .await
    }

    /// Notification style: decode inside the continuation and hand the
    /// result to `publish`. Failures are only logged.
    fn notify<T, D, P>(&self, payload: Payload, target_function: &str, decode: D, publish: P) -> RequestId
    where
        D: FnOnce(Value) -> Result<T, DecodeError> + Send + 'static,
        P: FnOnce(T) + Send + 'static,
    {
        let function = target_function.to_string();
        let continuation: Continuation = Box::new(move |result| {
            match result.and_then(|value| decode(value).map_err(BridgeError::from)) {
                Ok(decoded) => publish(decoded),
                Err(BridgeError::Decode(e)) => {
                    metrics::record_dropped("unexpected_shape");
                    warn!(target_function = %function, error = %e, "Dropping reply");
                }
                Err(e) => warn!(target_function = %function, error = %e, "Request failed"),
            }
        });

        let event = self.config().events.send_input.clone();
        self.send(&event, target_function, payload, continuation)
    }

    /// Latent style: the returned future is the one-shot resumption token.
    ///
    /// Dropping it cancels the request. Resolves with [`BridgeError::NoReply`]
    /// when the reply was dropped (empty array or shape mismatch with strict
    /// replies off).
    fn latent<T, D>(
        &self,
        payload: Payload,
        target_function: &str,
        decode: D,
    ) -> impl Future<Output = Result<T, BridgeError>> + Send + 'static
    where
        T: Send + 'static,
        D: FnOnce(Value) -> Result<T, DecodeError> + Send + 'static,
    {
        let strict = self.config().strict_replies;
        let timeout = self.config().reply_timeout;
        let function = target_function.to_string();
        let (tx, rx) = oneshot::channel::<Result<T, BridgeError>>();

        let continuation: Continuation = Box::new(move |result| {
            let decoded = result.and_then(|value| decode(value).map_err(BridgeError::from));
            match decoded {
                Err(BridgeError::Decode(e)) if !strict => {
                    metrics::record_dropped("unexpected_shape");
                    warn!(target_function = %function, error = %e, "Dropping reply");
                }
                other => {
                    let _ = tx.send(other);
                }
            }
        });

        let event = self.config().events.send_input.clone();
        let id = self.send(&event, target_function, payload, continuation);
        let guard = PendingGuard {
            core: Arc::clone(self.core()),
            id,
        };

        async move {
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        metrics::record_dropped("timeout");
                        warn!(request_id = guard.id, timeout_ms = limit.as_millis(), "Request timed out");
                        return Err(BridgeError::Timeout(limit));
                    }
                },
                None => rx.await,
            };
            drop(guard);
            outcome.unwrap_or(Err(BridgeError::NoReply))
        }
    }
}

impl std::fmt::Debug for MlBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlBridge")
            .field("address", &self.config().address)
            .field("status", &self.status())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Removes an abandoned request from the pending table
struct PendingGuard {
    core: Arc<Core>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.core.correlator.cancel(self.id);
    }
}
