//! Bridge configuration.
//!
//! Every field has a default matching a local development peer. Values can
//! be overridden in code with the `with_*` builders or from the environment
//! with [`BridgeConfig::from_env`].

use ml_proto::{EventNames, DEFAULT_ADDRESS};
use std::time::Duration;
use tracing::warn;

/// Script started after every successful connection by default
pub const DEFAULT_SCRIPT: &str = "empty_example";

/// Broadcast channel capacity for bridge notifications.
/// Slow subscribers lose the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5_000;

/// Transport-level reconnection policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a failed dial or a dropped connection before giving up.
    /// Zero disables reconnection.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled for each following one
    pub delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Peer address, `http://`, `ws://` or bare `host:port`
    pub address: String,

    /// Wire event names
    pub events: EventNames,

    /// Connect as soon as the bridge is started with [`crate::MlBridge::start`]
    pub connect_on_start: bool,

    /// Send `start_script(default_script)` whenever a connection is established
    pub start_script_on_connection: bool,

    pub default_script: String,

    /// Upper bound for awaited requests. `None` waits until the reply,
    /// a disconnect or cancellation.
    pub reply_timeout: Option<Duration>,

    /// Surface empty replies and shape mismatches as errors instead of
    /// logging and dropping them
    pub strict_replies: bool,

    pub reconnect: ReconnectPolicy,

    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            events: EventNames::default(),
            connect_on_start: true,
            start_script_on_connection: true,
            default_script: DEFAULT_SCRIPT.to_string(),
            reply_timeout: None,
            strict_replies: false,
            reconnect: ReconnectPolicy::default(),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Creates a config from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    ///
    /// Reads `ML_BRIDGE_ADDRESS`, `ML_BRIDGE_DEFAULT_SCRIPT`,
    /// `ML_BRIDGE_CONNECT_ON_START`, `ML_BRIDGE_START_SCRIPT_ON_CONNECTION`,
    /// `ML_BRIDGE_REPLY_TIMEOUT_MS`, `ML_BRIDGE_STRICT_REPLIES`,
    /// `ML_BRIDGE_RECONNECT_ATTEMPTS` and `ML_BRIDGE_RECONNECT_DELAY_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(address) = lookup("ML_BRIDGE_ADDRESS") {
            config.address = address;
        }
        if let Some(script) = lookup("ML_BRIDGE_DEFAULT_SCRIPT") {
            config.default_script = script;
        }
        if let Some(flag) = parse_var(&lookup, "ML_BRIDGE_CONNECT_ON_START", parse_bool) {
            config.connect_on_start = flag;
        }
        if let Some(flag) = parse_var(&lookup, "ML_BRIDGE_START_SCRIPT_ON_CONNECTION", parse_bool) {
            config.start_script_on_connection = flag;
        }
        if let Some(ms) = parse_var(&lookup, "ML_BRIDGE_REPLY_TIMEOUT_MS", |v| v.parse::<u64>().ok()) {
            config.reply_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(flag) = parse_var(&lookup, "ML_BRIDGE_STRICT_REPLIES", parse_bool) {
            config.strict_replies = flag;
        }
        if let Some(attempts) = parse_var(&lookup, "ML_BRIDGE_RECONNECT_ATTEMPTS", |v| v.parse().ok()) {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = parse_var(&lookup, "ML_BRIDGE_RECONNECT_DELAY_MS", |v| v.parse().ok()) {
            config.reconnect.delay = Duration::from_millis(ms);
        }

        config
    }

    pub fn with_events(mut self, events: EventNames) -> Self {
        self.events = events;
        self
    }

    pub fn with_connect_on_start(mut self, enabled: bool) -> Self {
        self.connect_on_start = enabled;
        self
    }

    /// Set the script started on connection, or `None` to disable auto-start
    pub fn with_auto_start(mut self, script: Option<&str>) -> Self {
        match script {
            Some(name) => {
                self.start_script_on_connection = true;
                self.default_script = name.to_string();
            }
            None => self.start_script_on_connection = false,
        }
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn with_strict_replies(mut self, strict: bool) -> Self {
        self.strict_replies = strict;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key = key, value = %raw, "Ignoring unparsable bridge setting");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.default_script, "empty_example");
        assert!(config.connect_on_start);
        assert!(config.start_script_on_connection);
        assert!(config.reply_timeout.is_none());
        assert!(!config.strict_replies);
        assert_eq!(config.events.send_input, "sendInput");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("ML_BRIDGE_ADDRESS", "ws://10.0.0.2:9000"),
            ("ML_BRIDGE_DEFAULT_SCRIPT", "demo_script"),
            ("ML_BRIDGE_START_SCRIPT_ON_CONNECTION", "false"),
            ("ML_BRIDGE_REPLY_TIMEOUT_MS", "250"),
            ("ML_BRIDGE_STRICT_REPLIES", "1"),
            ("ML_BRIDGE_RECONNECT_ATTEMPTS", "3"),
        ]));

        assert_eq!(config.address, "ws://10.0.0.2:9000");
        assert_eq!(config.default_script, "demo_script");
        assert!(!config.start_script_on_connection);
        assert_eq!(config.reply_timeout, Some(Duration::from_millis(250)));
        assert!(config.strict_replies);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("ML_BRIDGE_CONNECT_ON_START", "maybe"),
            ("ML_BRIDGE_REPLY_TIMEOUT_MS", "soon"),
        ]));

        assert!(config.connect_on_start);
        assert!(config.reply_timeout.is_none());
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let config = BridgeConfig::from_lookup(lookup_from(&[("ML_BRIDGE_REPLY_TIMEOUT_MS", "0")]));
        assert!(config.reply_timeout.is_none());
    }

    #[test]
    fn test_reconnect_backoff_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_auto_start_builder() {
        let config = BridgeConfig::default().with_auto_start(Some("demo_script"));
        assert!(config.start_script_on_connection);
        assert_eq!(config.default_script, "demo_script");

        let config = config.with_auto_start(None);
        assert!(!config.start_script_on_connection);
    }
}
