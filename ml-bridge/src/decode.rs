//! Reply decoding for the three payload modes.

use ml_proto::RawInput;
use serde_json::Value;

use crate::error::DecodeError;

/// Text mode: JSON strings are used verbatim, anything else is rendered to
/// its compact JSON text.
pub fn text_reply(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Same coercion for borrowed event payloads. A missing payload is empty.
pub fn text_payload(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Structured mode: the reply passes through untouched
pub fn json_reply(value: Value) -> Result<Value, DecodeError> {
    Ok(value)
}

/// Raw mode: the reply must be an object shaped like [`RawInput`]
pub fn raw_reply(value: Value) -> Result<RawInput, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::UnexpectedShape {
            expected: "float array wrapped object",
            got: value.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidEnvelope(e.to_string()))
}
