use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Default peer address
pub const DEFAULT_ADDRESS: &str = "http://localhost:8080";

/// Event names used on the wire. All of them are configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNames {
    /// Outbound, acknowledged: wrapped input for a target function
    pub send_input: String,
    /// Outbound, fire-and-forget: script name to start
    pub start_script: String,
    /// Inbound: the peer started a script
    pub script_started: String,
    /// Inbound: free-form log line from the peer
    pub log: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            send_input: "sendInput".to_string(),
            start_script: "startScript".to_string(),
            script_started: "scriptStarted".to_string(),
            log: "log".to_string(),
        }
    }
}

/// Map a peer address to the WebSocket URL that is dialed.
///
/// `http`/`https` become `ws`/`wss`, WebSocket URLs pass through and bare
/// `host:port` addresses get `ws://`.
pub fn websocket_url(address: &str) -> Result<String, ProtoError> {
    let address = address.trim();
    let Some((scheme, rest)) = address.split_once("://") else {
        return Ok(format!("ws://{address}"));
    };
    // Schemes are case-insensitive
    match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => Ok(format!("ws://{rest}")),
        "https" | "wss" => Ok(format!("wss://{rest}")),
        _ => Err(ProtoError::UnsupportedScheme(scheme.to_string())),
    }
}
