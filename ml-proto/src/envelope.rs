//! Payload envelopes.
//!
//! The wire protocol has no header for the function the peer should run, so
//! every input is wrapped in an object that names it next to the data.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

/// Text input wrapped with its target function
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StringInput {
    pub target_function: String,
    pub input_data: String,
}

impl StringInput {
    pub fn new(input_data: impl Into<String>, target_function: impl Into<String>) -> Self {
        Self {
            target_function: target_function.into(),
            input_data: input_data.into(),
        }
    }
}

/// Float array wrapped with its target function.
///
/// Used in both directions: the peer replies with the same shape. Missing
/// fields decode to their defaults. Floats are written as the shortest
/// decimal that reads back to the same `f32`, so `1.1` goes out as `1.1`
/// rather than its widened `f64` value, also when going through
/// `serde_json::Value`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawInput {
    #[serde(default, serialize_with = "serialize_f32_seq")]
    pub input_data: Vec<f32>,
    #[serde(default)]
    pub target_function: String,
}

impl RawInput {
    pub fn new(input_data: Vec<f32>, target_function: impl Into<String>) -> Self {
        Self {
            input_data,
            target_function: target_function.into(),
        }
    }
}

fn serialize_f32_seq<S: Serializer>(data: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(data.iter().map(|x| x.to_string().parse::<f64>().unwrap_or(f64::NAN)))
}

/// Wrap an arbitrary JSON value with its target function
pub fn json_envelope(target_function: &str, input_data: Value) -> Value {
    json!({
        "targetFunction": target_function,
        "inputData": input_data,
    })
}
