//! Connection driver.
//!
//! One task per [`crate::MlBridge::connect`] owns the WebSocket. It dials the
//! peer, processes every inbound frame in order (so handlers and
//! continuations never run concurrently), writes outbound frames queued by
//! callers, and applies the reconnect policy when the link drops.
//!
//! Frames queued before the peer's `connect` frame (or while reconnecting)
//! are held in a backlog and flushed once the session is established.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use ml_proto::Frame;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::bridge::Core;
use crate::error::BridgeError;
use crate::events::{BridgeEvent, ConnectionState};
use crate::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CLIENT_DISCONNECT: &str = "client disconnect";
const PEER_DISCONNECT: &str = "server disconnect";
const TRANSPORT_CLOSE: &str = "transport close";

/// Requests from the bridge handle to the driver
#[derive(Debug)]
pub(crate) enum Command {
    Send(Frame),
    Close,
}

/// Owning handle to a running driver task
#[derive(Debug)]
pub(crate) struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub(crate) fn spawn(core: Arc<Core>, url: String) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let driver = Driver {
            core,
            url,
            commands: receiver,
            backlog: VecDeque::new(),
        };
        let task = tokio::spawn(driver.run());
        Self { commands, task }
    }

    /// Queue a frame. False once the driver has stopped.
    pub(crate) fn send(&self, frame: Frame) -> bool {
        self.commands.send(Command::Send(frame)).is_ok()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the driver to close the socket and wait for it to stop
    pub(crate) async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "Connection driver panicked");
            }
        }
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

/// Why a session ended
enum SessionEnd {
    /// `disconnect()` was called
    Closed,
    /// The peer sent a `disconnect` frame; no reconnect
    PeerDisconnect(String),
    /// Socket error or close; `connected` tells whether the peer had
    /// confirmed the session
    Lost { reason: String, connected: bool },
}

struct Driver {
    core: Arc<Core>,
    url: String,
    commands: mpsc::UnboundedReceiver<Command>,
    backlog: VecDeque<Frame>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.core.set_status(ConnectionState::Connecting, None);

            let reason = match self.dial().await {
                None => break,
                Some(Ok(ws)) => match self.session(ws).await {
                    SessionEnd::Closed => break,
                    SessionEnd::PeerDisconnect(reason) => {
                        info!(url = %self.url, reason = %reason, "Peer closed the session");
                        break;
                    }
                    SessionEnd::Lost { reason, connected } => {
                        if connected {
                            attempt = 0;
                        }
                        reason
                    }
                },
                Some(Err(e)) => {
                    warn!(url = %self.url, error = %e, "Failed to connect to peer");
                    e.to_string()
                }
            };

            self.core.set_status(ConnectionState::Disconnected, None);

            let policy = &self.core.config.reconnect;
            if attempt >= policy.max_attempts {
                error!(
                    url = %self.url,
                    attempts = attempt,
                    reason = %reason,
                    "Giving up on peer connection"
                );
                self.core.publish(BridgeEvent::ConnectFailed { reason });
                break;
            }

            attempt += 1;
            let delay = policy.delay_for(attempt);
            info!(
                url = %self.url,
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to peer"
            );
            metrics::record_reconnect_attempt();
            self.core
                .publish(BridgeEvent::ReconnectAttempt { attempt, delay });

            if !self.backoff(delay).await {
                break;
            }
        }

        self.core.set_status(ConnectionState::Disconnected, None);
        self.backlog.clear();
        let failed = self.core.correlator.fail_all(|| BridgeError::NotConnected);
        if failed > 0 {
            metrics::record_dropped("not_connected");
            debug!(failed = failed, "Failed requests left after driver stop");
        }
    }

    /// Dial the peer. `None` when closed while dialing.
    async fn dial(&mut self) -> Option<Result<WsStream, tokio_tungstenite::tungstenite::Error>> {
        debug!(url = %self.url, "Dialing peer");
        let url = self.url.clone();
        let dial = connect_async(url.as_str());
        tokio::pin!(dial);

        loop {
            tokio::select! {
                result = &mut dial => return Some(result.map(|(ws, _response)| ws)),
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => self.hold(frame),
                    Some(Command::Close) | None => return None,
                },
            }
        }
    }

    /// Sleep before the next attempt. False when closed meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => self.hold(frame),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    /// Run one socket until it ends
    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut session_id: Option<String> = None;

        let end = loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            if let Some(end) = self.handle_frame(frame, &mut session_id, &mut sink).await {
                                break end;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed frame"),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        warn!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| TRANSPORT_CLOSE.to_string());
                        break SessionEnd::Lost { reason, connected: session_id.is_some() };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break SessionEnd::Lost { reason: e.to_string(), connected: session_id.is_some() };
                    }
                    None => {
                        break SessionEnd::Lost {
                            reason: TRANSPORT_CLOSE.to_string(),
                            connected: session_id.is_some(),
                        };
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if session_id.is_none() {
                            self.hold(frame);
                        } else if self.is_stale(&frame) {
                            debug!("Request settled before it was sent, dropping frame");
                        } else if let Err(e) = transmit(&mut sink, &frame).await {
                            warn!(error = %e, "Send failed");
                            break SessionEnd::Lost { reason: e.to_string(), connected: true };
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = transmit(&mut sink, &Frame::disconnect(CLIENT_DISCONNECT)).await {
                            debug!(error = %e, "Could not send disconnect frame");
                        }
                        let _ = sink.close().await;
                        break SessionEnd::Closed;
                    }
                },
            }
        };

        if let Some(session_id) = session_id {
            let reason = match &end {
                SessionEnd::Closed => CLIENT_DISCONNECT.to_string(),
                SessionEnd::PeerDisconnect(reason) | SessionEnd::Lost { reason, .. } => reason.clone(),
            };
            self.on_disconnected(session_id, reason);
        }

        end
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        session_id: &mut Option<String>,
        sink: &mut WsSink,
    ) -> Option<SessionEnd> {
        match frame {
            Frame::Connect { sid } => {
                if session_id.is_some() {
                    debug!(sid = %sid, "Duplicate connect frame ignored");
                    return None;
                }
                *session_id = Some(sid.clone());
                self.on_connected(sid);
                self.flush_backlog(sink).await
            }
            Frame::Event { event, data, id } => {
                debug!(event = %event, "Inbound event");
                if let Some(id) = id {
                    debug!(event = %event, request_id = id, "Peer asked for an ack, none sent");
                }
                self.core.router.dispatch(&event, data.as_ref());
                None
            }
            Frame::Ack { id, data } => {
                self.core.correlator.resolve(id, data);
                None
            }
            Frame::Disconnect { reason } => Some(SessionEnd::PeerDisconnect(
                reason.unwrap_or_else(|| PEER_DISCONNECT.to_string()),
            )),
        }
    }

    fn on_connected(&mut self, session_id: String) {
        info!(url = %self.url, session_id = %session_id, "Connected to peer");
        metrics::record_connection();

        self.core.reset_session();
        self.core
            .set_status(ConnectionState::Connected, Some(session_id.clone()));
        self.core.publish(BridgeEvent::Connected { session_id });

        let config = &self.core.config;
        if config.start_script_on_connection {
            info!(script = %config.default_script, "Starting default script");
            self.backlog.push_front(Frame::event(
                config.events.start_script.clone(),
                config.default_script.clone(),
            ));
        }
    }

    fn on_disconnected(&mut self, session_id: String, reason: String) {
        info!(session_id = %session_id, reason = %reason, "Disconnected from peer");
        self.core.set_status(ConnectionState::Disconnected, None);

        let failed = self.core.correlator.fail_all(|| BridgeError::ConnectionLost);
        if failed > 0 {
            metrics::record_dropped("connection_lost");
            warn!(failed = failed, "Pending requests lost with the connection");
        }

        self.core
            .publish(BridgeEvent::Disconnected { session_id, reason });
    }

    /// True for a request frame whose caller has already been answered
    /// (failed by a dropped link, cancelled or timed out)
    fn is_stale(&self, frame: &Frame) -> bool {
        match frame {
            Frame::Event { id: Some(id), .. } => !self.core.correlator.is_pending(*id),
            _ => false,
        }
    }

    /// Keep a frame for the next session unless it is already stale
    fn hold(&mut self, frame: Frame) {
        if self.is_stale(&frame) {
            debug!("Request settled while disconnected, dropping frame");
        } else {
            self.backlog.push_back(frame);
        }
    }

    async fn flush_backlog(&mut self, sink: &mut WsSink) -> Option<SessionEnd> {
        while let Some(frame) = self.backlog.pop_front() {
            if self.is_stale(&frame) {
                debug!("Request settled while queued, dropping frame");
                continue;
            }
            if let Err(e) = transmit(sink, &frame).await {
                warn!(error = %e, "Send failed while flushing backlog");
                return Some(SessionEnd::Lost {
                    reason: e.to_string(),
                    connected: true,
                });
            }
        }
        None
    }
}

async fn transmit(sink: &mut WsSink, frame: &Frame) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Dropping frame that failed to encode");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
