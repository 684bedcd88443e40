//! Text frames exchanged over the bridge connection.
//!
//! Every WebSocket text message is one JSON object tagged by `type`.
//! Requests that expect a reply carry an `id`; the peer answers with an
//! `ack` frame holding the same `id` and an array of reply entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtoError;

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Sent by the peer once the socket is open. `sid` names the session.
    Connect { sid: String },

    /// A named event with an optional payload.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },

    /// Reply entries for the event that carried `id`.
    Ack {
        id: u64,
        #[serde(default)]
        data: Vec<Value>,
    },

    /// Graceful close notice from either side.
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Frame {
    /// Fire-and-forget event
    pub fn event(event: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::Event {
            event: event.into(),
            data: Some(data.into()),
            id: None,
        }
    }

    /// Event that asks the peer for an acknowledgement
    pub fn request(event: impl Into<String>, data: impl Into<Value>, id: u64) -> Self {
        Self::Event {
            event: event.into(),
            data: Some(data.into()),
            id: Some(id),
        }
    }

    pub fn ack(id: u64, data: Vec<Value>) -> Self {
        Self::Ack { id, data }
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: Some(reason.into()),
        }
    }

    /// Serialize to the JSON text sent on the wire
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one JSON text message
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}
