//! Notifications and observable state.

use serde::Serialize;
use std::time::Duration;

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Dialing, or socket open and waiting for the peer's `connect` frame
    Connecting,
    Connected,
}

/// Connection state plus the session id assigned by the peer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Only set while connected
    pub session_id: Option<String>,
}

/// State of the remote computation as last reported by the peer.
///
/// Becomes `Running` only when the peer announces it; a new connection
/// resets it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScriptSession {
    #[default]
    NotRunning,
    Running { name: String },
}

impl ScriptSession {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Notifications broadcast to every subscriber of the bridge.
///
/// Serializes as `{"event": "<snake_case name>", "data": ...}` for hosts
/// that forward notifications as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connected {
        session_id: String,
    },
    Disconnected {
        /// Session that just ended
        session_id: String,
        reason: String,
    },
    ReconnectAttempt {
        attempt: u32,
        delay: Duration,
    },
    /// Dial failed and no reconnect attempts are left
    ConnectFailed {
        reason: String,
    },
    ScriptStarted(String),
    Log(String),
    /// Result of a text input sent in notification style
    InputResult {
        result: String,
        target_function: String,
    },
    /// Result of a raw float input sent in notification style
    RawInputResult {
        data: Vec<f32>,
        target_function: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_shape() {
        let event = BridgeEvent::InputResult {
            result: "hello-processed".to_string(),
            target_function: "onJsonInput".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "input_result",
                "data": {"result": "hello-processed", "target_function": "onJsonInput"}
            })
        );

        let started = BridgeEvent::ScriptStarted("demo_script".to_string());
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"event": "script_started", "data": "demo_script"})
        );
    }

    #[test]
    fn test_status_json_shape() {
        let status = ConnectionStatus {
            state: ConnectionState::Connected,
            session_id: Some("sid-1".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"state": "connected", "session_id": "sid-1"})
        );
        assert_eq!(
            serde_json::to_value(ScriptSession::Running { name: "demo_script".to_string() }).unwrap(),
            json!({"status": "running", "name": "demo_script"})
        );
        assert_eq!(
            serde_json::to_value(ScriptSession::NotRunning).unwrap(),
            json!({"status": "not_running"})
        );
    }
}
