use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Not connected to the remote peer")]
    NotConnected,

    #[error("Connection to the remote peer was lost")]
    ConnectionLost,

    #[error("Reply timeout: peer did not respond within {0:?}")]
    Timeout(Duration),

    /// The reply was dropped without reaching the caller (empty reply array
    /// or a shape mismatch while strict replies are off).
    #[error("Request finished without a usable reply")]
    NoReply,

    #[error("Failed to decode reply: {0}")]
    Decode(#[from] DecodeError),
}

/// Reply shape problems
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reply array was empty")]
    EmptyReply,

    #[error("expected {expected}, got {got}")]
    UnexpectedShape { expected: &'static str, got: String },

    #[error("invalid reply envelope: {0}")]
    InvalidEnvelope(String),
}
