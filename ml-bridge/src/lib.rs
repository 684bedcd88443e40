//! ML Bridge - WebSocket client for a remote ML process
//!
//! This crate provides an `MlBridge` that keeps a persistent WebSocket
//! connection to a remote machine-learning peer and exchanges inputs and
//! results with it as text, structured JSON or raw `f32` arrays.
//!
//! # Architecture
//!
//! - **Connection management**: one driver task per connection dials the
//!   peer, applies the reconnect policy and raises lifecycle notifications
//! - **Event routing**: named inbound events (`scriptStarted`, `log`, ...)
//!   are dispatched to registered handlers in order
//! - **Request/reply correlation**: every request carries an id; the peer's
//!   acknowledgement fires the matching continuation exactly once
//!
//! Inference runs in the remote process, so the host never blocks on it and
//! a crashed model server only shows up as a disconnect.
//!
//! # Example
//!
//! ```ignore
//! use ml_bridge::{BridgeConfig, BridgeEvent, MlBridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = MlBridge::start(BridgeConfig::from_env());
//!     bridge.wait_connected(std::time::Duration::from_secs(5)).await?;
//!
//!     let reply = bridge.send_string_input_await("hello", "onJsonInput").await?;
//!     println!("Result: {reply}");
//!
//!     let scores = bridge.send_raw_input_await(vec![1.0, 2.0, 3.0], "onFloatArrayInput").await?;
//!     println!("Scores: {scores:?}");
//!
//!     bridge.disconnect().await;
//!     Ok(())
//! }
//! ```

mod bridge;
pub mod config;
mod connection;
pub mod correlator;
pub mod decode;
pub mod error;
pub mod events;
pub mod metrics;
pub mod router;

// Re-export main types for convenience
pub use bridge::{MlBridge, DEFAULT_JSON_FUNCTION, DEFAULT_RAW_FUNCTION};
pub use config::{BridgeConfig, ReconnectPolicy, DEFAULT_SCRIPT};
pub use correlator::{Continuation, Correlator, Payload, RequestId};
pub use error::{BridgeError, DecodeError};
pub use events::{BridgeEvent, ConnectionState, ConnectionStatus, ScriptSession};
pub use ml_proto::EventNames;
pub use router::{EventHandler, EventRouter, HandlerId};
