//! Peer configuration loaded from environment variables.

use ml_proto::EventNames;

/// Default listen address
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Socket address the server listens on
    pub bind: String,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// Wire event names; must match the bridge's
    pub events: EventNames,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_json: false,
            events: EventNames::default(),
        }
    }
}

impl PeerConfig {
    /// Read `ML_PEER_BIND` and `ML_PEER_LOG_JSON`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bind) = lookup("ML_PEER_BIND").filter(|b| !b.trim().is_empty()) {
            config.bind = bind.trim().to_string();
        }
        if let Some(flag) = lookup("ML_PEER_LOG_JSON") {
            config.log_json = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        config
    }
}
