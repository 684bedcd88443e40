//! Named scripts run by the peer.
//!
//! A script is a table of target functions. Each function receives the full
//! input envelope and returns the reply entries sent back in the `ack`.

use ml_proto::RawInput;
use serde_json::Value;
use std::collections::HashMap;

/// Target function: envelope in, reply entries out
pub type FunctionHandler = fn(&Value) -> Vec<Value>;

#[derive(Clone)]
pub struct Script {
    name: String,
    functions: HashMap<String, FunctionHandler>,
}

impl Script {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn with_function(mut self, target_function: impl Into<String>, handler: FunctionHandler) -> Self {
        self.functions.insert(target_function.into(), handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `target_function`. Unknown functions reply with no entries.
    pub fn call(&self, target_function: &str, envelope: &Value) -> Vec<Value> {
        match self.functions.get(target_function) {
            Some(handler) => handler(envelope),
            None => {
                tracing::debug!(
                    script = %self.name,
                    target_function = target_function,
                    "Unknown target function"
                );
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("functions", &functions)
            .finish()
    }
}

/// Scripts known to the peer, by name
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Script>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `empty_example` (echo) and `demo_script` (processing)
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            Script::new("empty_example")
                .with_function("onJsonInput", echo_input)
                .with_function("onFloatArrayInput", echo_raw),
        );
        registry.register(
            Script::new("demo_script")
                .with_function("onJsonInput", process_input)
                .with_function("onFloatArrayInput", double_raw),
        );
        registry
    }

    pub fn register(&mut self, script: Script) {
        self.scripts.insert(script.name.clone(), script);
    }

    pub fn get(&self, name: &str) -> Option<&Script> {
        self.scripts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

fn input_data(envelope: &Value) -> Value {
    envelope.get("inputData").cloned().unwrap_or(Value::Null)
}

fn echo_input(envelope: &Value) -> Vec<Value> {
    vec![input_data(envelope)]
}

fn echo_raw(envelope: &Value) -> Vec<Value> {
    match serde_json::from_value::<RawInput>(envelope.clone()) {
        Ok(raw) => serde_json::to_value(raw).map(|v| vec![v]).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Text gets `-processed` appended; other values are echoed
fn process_input(envelope: &Value) -> Vec<Value> {
    match input_data(envelope) {
        Value::String(text) => vec![Value::String(format!("{text}-processed"))],
        other => vec![other],
    }
}

fn double_raw(envelope: &Value) -> Vec<Value> {
    match serde_json::from_value::<RawInput>(envelope.clone()) {
        Ok(mut raw) => {
            raw.input_data.iter_mut().for_each(|x| *x *= 2.0);
            serde_json::to_value(raw).map(|v| vec![v]).unwrap_or_default()
        }
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_scripts_registered() {
        let registry = ScriptRegistry::with_builtin();
        assert!(registry.contains("empty_example"));
        assert!(registry.contains("demo_script"));
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_echo_input() {
        let registry = ScriptRegistry::with_builtin();
        let script = registry.get("empty_example").unwrap();
        let envelope = json!({"targetFunction": "onJsonInput", "inputData": {"a": [1, 2]}});

        assert_eq!(script.call("onJsonInput", &envelope), vec![json!({"a": [1, 2]})]);
    }

    #[test]
    fn test_process_input_appends_suffix() {
        let registry = ScriptRegistry::with_builtin();
        let script = registry.get("demo_script").unwrap();
        let envelope = json!({"targetFunction": "onJsonInput", "inputData": "hello"});

        assert_eq!(script.call("onJsonInput", &envelope), vec![json!("hello-processed")]);
    }

    #[test]
    fn test_raw_functions() {
        let registry = ScriptRegistry::with_builtin();
        let envelope = json!({"inputData": [1.0, 2.0, 3.0], "targetFunction": "onFloatArrayInput"});

        let echoed = registry.get("empty_example").unwrap().call("onFloatArrayInput", &envelope);
        assert_eq!(echoed, vec![envelope.clone()]);

        let doubled = registry.get("demo_script").unwrap().call("onFloatArrayInput", &envelope);
        assert_eq!(
            doubled,
            vec![json!({"inputData": [2.0, 4.0, 6.0], "targetFunction": "onFloatArrayInput"})]
        );
    }

    #[test]
    fn test_unknown_function_replies_empty() {
        let registry = ScriptRegistry::with_builtin();
        let script = registry.get("empty_example").unwrap();
        assert!(script.call("onAudioInput", &json!({})).is_empty());
    }

    #[test]
    fn test_bad_raw_envelope_replies_empty() {
        let registry = ScriptRegistry::with_builtin();
        let script = registry.get("empty_example").unwrap();
        let envelope = json!({"inputData": "text", "targetFunction": "onFloatArrayInput"});
        assert!(script.call("onFloatArrayInput", &envelope).is_empty());
    }
}
