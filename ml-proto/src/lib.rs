//! ML Proto - wire types for the remote ML bridge
//!
//! Both sides of the bridge exchange JSON text frames over a WebSocket:
//! - [`Frame`] is the tagged frame (`connect`, `event`, `ack`, `disconnect`)
//! - [`envelope`] holds the payload wrappers that carry the target function
//! - [`events`] holds the configurable event names and address handling

pub mod envelope;
pub mod events;
pub mod frame;

pub use envelope::{json_envelope, RawInput, StringInput};
pub use events::{websocket_url, EventNames, DEFAULT_ADDRESS};
pub use frame::Frame;

use thiserror::Error;

/// Errors produced while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported address scheme: {0}")]
    UnsupportedScheme(String),
}
