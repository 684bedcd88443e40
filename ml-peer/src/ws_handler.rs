//! WebSocket handler for bridge connections.
//!
//! Each accepted socket gets a fresh session id in a `connect` frame, then
//! the loop answers:
//! - `startScript`: activates a named script and reports `scriptStarted`
//! - `sendInput`: runs the active script's target function, replying in an `ack`
//! - `disconnect`: ends the session
//!
//! Any other event that carries an id is acknowledged with no entries so
//! the client never waits on it.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use ml_proto::Frame;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{generate_connection_id, generate_session_id, ConnectionInfo};
use crate::state::AppState;

/// What the session loop does after a frame
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Outcome {
    pub frames: Vec<Frame>,
    pub close: bool,
}

impl Outcome {
    fn reply(frames: Vec<Frame>) -> Self {
        Self { frames, close: false }
    }

    fn close() -> Self {
        Self {
            frames: Vec::new(),
            close: true,
        }
    }
}

/// WebSocket upgrade handler for GET / and GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let connection_id = generate_connection_id();
    let session_id = generate_session_id();

    info!(
        ip = %addr.ip(),
        connection_id = connection_id,
        session_id = session_id,
        "Bridge connection accepted"
    );

    state.register_connection(ConnectionInfo::new(
        connection_id.clone(),
        session_id.clone(),
        Some(addr.ip()),
    ));

    ws.on_upgrade(move |socket| handle_socket(socket, connection_id, session_id, state))
}

async fn handle_socket(socket: WebSocket, connection_id: String, session_id: String, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut outgoing = vec![Frame::Connect {
        sid: session_id.clone(),
    }];

    'session: loop {
        let sent = outgoing.len() as u64;
        for frame in outgoing.drain(..) {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = connection_id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                info!(connection_id = connection_id, "Client disconnected (send failed)");
                break 'session;
            }
            crate::metrics::record_frame_sent();
        }
        state.update_connection(&connection_id, |c| c.increment_sent(sent));

        let Some(result) = ws_receiver.next().await else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                crate::metrics::record_frame_received();
                state.update_connection(&connection_id, ConnectionInfo::increment_received);

                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(connection_id = connection_id, error = %e, "Dropping malformed frame");
                        continue;
                    }
                };

                let outcome = respond(&state, &connection_id, frame);
                if outcome.close {
                    info!(connection_id = connection_id, "Client sent disconnect");
                    break;
                }
                outgoing = outcome.frames;
            }
            Ok(Message::Binary(data)) => {
                debug!(connection_id = connection_id, len = data.len(), "Ignoring binary message");
            }
            Ok(Message::Ping(_)) => {
                tracing::trace!(connection_id = connection_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                state.update_connection(&connection_id, ConnectionInfo::touch);
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = connection_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                warn!(connection_id = connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    if let Some(info) = state.unregister_connection(&connection_id) {
        info!(
            connection_id = connection_id,
            session_id = session_id,
            script = info.active_script.as_deref().unwrap_or("-"),
            frames_sent = info.frames_sent,
            frames_received = info.frames_received,
            requests_answered = info.requests_answered,
            duration_secs = info.duration().num_seconds(),
            "Client disconnected"
        );
    }
}

/// Frames answering one inbound frame
pub(crate) fn respond(state: &AppState, connection_id: &str, frame: Frame) -> Outcome {
    match frame {
        Frame::Event { event, data, id } => {
            let mut frames = if event == state.events.start_script {
                start_script(state, connection_id, data.as_ref())
            } else if event == state.events.send_input {
                if let Some(id) = id {
                    return Outcome::reply(vec![send_input(state, connection_id, id, data.as_ref())]);
                }
                debug!(connection_id = connection_id, "Input without request id ignored");
                Vec::new()
            } else {
                debug!(connection_id = connection_id, event = %event, "Unhandled event");
                Vec::new()
            };
            if let Some(id) = id {
                frames.push(Frame::ack(id, Vec::new()));
            }
            Outcome::reply(frames)
        }
        Frame::Disconnect { .. } => Outcome::close(),
        Frame::Connect { .. } | Frame::Ack { .. } => {
            debug!(connection_id = connection_id, "Unexpected frame from client ignored");
            Outcome::default()
        }
    }
}

fn start_script(state: &AppState, connection_id: &str, data: Option<&Value>) -> Vec<Frame> {
    let name = match data {
        Some(Value::String(name)) => name.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let known = state.scripts.contains(&name);
    crate::metrics::record_script_start(&name, known);

    if !known {
        warn!(connection_id = connection_id, script = %name, "Unknown script requested");
        return vec![Frame::event(state.events.log.clone(), format!("Unknown script: {name}"))];
    }

    info!(connection_id = connection_id, script = %name, "Script started");
    state.update_connection(connection_id, |c| c.start_script(name.clone()));
    vec![
        Frame::event(state.events.log.clone(), format!("Starting script {name}")),
        Frame::event(state.events.script_started.clone(), name),
    ]
}

fn send_input(state: &AppState, connection_id: &str, id: u64, envelope: Option<&Value>) -> Frame {
    let started = Instant::now();
    let envelope = envelope.cloned().unwrap_or(Value::Null);
    let target = envelope
        .get("targetFunction")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let replies = match state.active_script(connection_id) {
        Some(name) => state
            .scripts
            .get(&name)
            .map(|script| script.call(target, &envelope))
            .unwrap_or_default(),
        None => {
            debug!(connection_id = connection_id, target_function = target, "No active script");
            Vec::new()
        }
    };

    state.update_connection(connection_id, ConnectionInfo::increment_answered);
    crate::metrics::record_request_latency(started.elapsed());
    Frame::ack(id, replies)
}
