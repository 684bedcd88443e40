//! Shared application state for the peer.

use dashmap::DashMap;
use ml_proto::EventNames;
use std::sync::Arc;

use crate::connection::{ConnectionId, ConnectionInfo};
use crate::scripts::ScriptRegistry;

/// Type alias for connection ID to connection info mapping.
pub type ConnectionsMap = DashMap<ConnectionId, ConnectionInfo>;

/// Shared application state for the peer.
#[derive(Clone)]
pub struct AppState {
    /// Thread-safe map of connection IDs to their metadata.
    pub connections: Arc<ConnectionsMap>,

    /// Scripts clients can start
    pub scripts: Arc<ScriptRegistry>,

    /// Wire event names
    pub events: EventNames,

    /// Service start time for uptime calculations
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(scripts: ScriptRegistry, events: EventNames) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            scripts: Arc::new(scripts),
            events,
            started_at: chrono::Utc::now(),
        }
    }

    /// State with the built-in scripts and default event names
    pub fn with_builtin() -> Self {
        Self::new(ScriptRegistry::with_builtin(), EventNames::default())
    }

    /// Register a new connection.
    pub fn register_connection(&self, info: ConnectionInfo) {
        let id = info.id.clone();
        self.connections.insert(id.clone(), info);
        crate::metrics::record_connection();
        tracing::debug!(connection_id = %id, "Connection registered");
    }

    /// Unregister a connection.
    pub fn unregister_connection(&self, connection_id: &str) -> Option<ConnectionInfo> {
        let removed = self.connections.remove(connection_id);
        if removed.is_some() {
            crate::metrics::record_disconnection();
            tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        }
        removed.map(|(_, v)| v)
    }

    /// Update connection info.
    pub fn update_connection<F>(&self, connection_id: &str, update_fn: F)
    where
        F: FnOnce(&mut ConnectionInfo),
    {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            update_fn(&mut entry);
        }
    }

    /// Script started by a connection
    pub fn active_script(&self, connection_id: &str) -> Option<String> {
        self.connections
            .get(connection_id)
            .and_then(|entry| entry.active_script.clone())
    }

    /// Get service uptime in seconds.
    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }

    /// Get total number of connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
