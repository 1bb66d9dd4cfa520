//! Canonical broadcast envelope.
//!
//! Every message delivered to realtime clients is an `Envelope`: a JSON
//! object carrying `type`, `title`, `payload` and `timestamp`. `normalize`
//! turns caller-supplied payloads into that shape without discarding any
//! caller key.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Epoch timestamp in fractional seconds, the unit clients expect.
pub fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A broadcast message in canonical form. Wraps the underlying JSON object
/// so caller-supplied keys survive verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    pub fn new(kind: &str, title: &str, payload: Value) -> Self {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(kind.into()));
        map.insert("title".into(), Value::String(title.into()));
        map.insert("payload".into(), payload);
        map.insert("timestamp".into(), json!(now_epoch()));
        Self(map)
    }

    /// Wrap a raw string the way the simulation log expects it.
    pub fn log(details: &str) -> Self {
        Self::new("simulation_log", "Simulation Log", json!({ "details": details }))
    }

    /// A user-visible error envelope.
    pub fn error(message: &str) -> Self {
        Self::new("error", "Error", Value::String(message.into()))
    }

    pub fn kind(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    pub fn payload(&self) -> &Value {
        self.0.get("payload").unwrap_or(&Value::Null)
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.0.get("timestamp").and_then(Value::as_f64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Coerce an arbitrary outbound message into an `Envelope`.
///
/// Strings become `simulation_log` envelopes; objects pass through with a
/// timestamp injected when absent. Anything else is logged and dropped:
/// broadcasting is best-effort and never surfaces an error to the caller.
pub fn normalize(message: Value) -> Option<Envelope> {
    match message {
        Value::String(s) => Some(Envelope::log(&s)),
        Value::Object(mut map) => {
            map.entry("timestamp").or_insert_with(|| json!(now_epoch()));
            Some(Envelope(map))
        }
        other => {
            tracing::warn!(?other, "cannot broadcast message of unsupported shape");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_strings() {
        let env = normalize(json!("hello")).unwrap();
        assert_eq!(env.kind(), "simulation_log");
        assert_eq!(env.title(), Some("Simulation Log"));
        assert_eq!(env.payload()["details"], "hello");
        assert!(env.timestamp().is_some());
    }

    #[test]
    fn normalize_injects_timestamp_into_objects() {
        let env = normalize(json!({ "type": "x" })).unwrap();
        assert_eq!(env.kind(), "x");
        assert!(env.timestamp().is_some());
    }

    #[test]
    fn normalize_keeps_caller_timestamp() {
        let env = normalize(json!({ "type": "x", "timestamp": 12.5 })).unwrap();
        assert_eq!(env.timestamp(), Some(12.5));
    }

    #[test]
    fn normalize_preserves_extra_keys() {
        let env = normalize(json!({
            "type": "agent_response",
            "payload": { "result": "ok" },
            "trace_id": "abc-123"
        }))
        .unwrap();
        assert_eq!(env.get("trace_id").unwrap(), "abc-123");
        assert_eq!(env.payload()["result"], "ok");
    }

    #[test]
    fn normalize_drops_other_shapes() {
        assert!(normalize(json!(42)).is_none());
        assert!(normalize(json!([1, 2])).is_none());
        assert!(normalize(Value::Null).is_none());
        assert!(normalize(json!(true)).is_none());
    }

    #[test]
    fn error_envelope_shape() {
        let env = Envelope::error("invalid entry point");
        assert_eq!(env.kind(), "error");
        assert_eq!(env.title(), Some("Error"));
        assert_eq!(env.payload(), "invalid entry point");
    }

    #[test]
    fn serializes_as_flat_object() {
        let env = Envelope::new("weather_alert", "Weather Alert", json!({ "area": "north" }));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "weather_alert");
        assert_eq!(value["payload"]["area"], "north");
        assert!(value["timestamp"].is_f64());
    }
}
