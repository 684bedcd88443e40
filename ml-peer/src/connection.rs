//! Connection tracking and metadata management
//!
//! Tracks connected bridge clients with their session id, active script
//! and traffic counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier
pub type ConnectionId = String;

/// Connection metadata for tracking and monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Unique connection identifier
    pub id: ConnectionId,

    /// Session id announced to the client in the `connect` frame
    pub session_id: String,

    /// Client IP address
    pub ip_address: Option<IpAddr>,

    /// Script started by this client, if any
    pub active_script: Option<String>,

    /// Timestamp when connection was established
    pub connected_at: DateTime<Utc>,

    /// Last activity timestamp
    pub last_activity: DateTime<Utc>,

    /// Frames received from the client
    pub frames_received: u64,

    /// Frames sent to the client
    pub frames_sent: u64,

    /// Requests answered with an ack
    pub requests_answered: u64,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId, session_id: String, ip_address: Option<IpAddr>) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id,
            ip_address,
            active_script: None,
            connected_at: now,
            last_activity: now,
            frames_received: 0,
            frames_sent: 0,
            requests_answered: 0,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn increment_received(&mut self) {
        self.frames_received += 1;
        self.touch();
    }

    pub fn increment_sent(&mut self, frames: u64) {
        self.frames_sent += frames;
    }

    pub fn increment_answered(&mut self) {
        self.requests_answered += 1;
    }

    pub fn start_script(&mut self, name: impl Into<String>) {
        self.active_script = Some(name.into());
    }

    /// Get connection duration
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Global connection counter for generating unique IDs
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique connection ID
pub fn generate_connection_id() -> ConnectionId {
    let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
    let timestamp = Utc::now().timestamp_millis();
    format!("conn_{timestamp:x}_{counter:x}")
}

/// Generate a session id for the `connect` frame
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
