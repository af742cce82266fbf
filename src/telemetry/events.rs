use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Event names emitted by this crate.
pub mod names {
    /// A replay failed and will be retried after the backoff delay.
    pub const SYNC_RETRY: &str = "bg.sync.retry";
    /// A queued request was replayed successfully.
    pub const SYNC_SUCCEEDED: &str = "bg.sync.succeeded";
    /// A queued request exhausted its attempts for this drain.
    pub const SYNC_FAILED: &str = "bg.sync.failed";
    /// A cached API response was served instead of the network.
    pub const CACHE_HIT: &str = "sw.fetch.cache_hit";
    /// The host finished installing this worker version.
    pub const INSTALL: &str = "sw.install";
}

/// A named telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub name: String,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl TelemetryEvent {
    /// Build an event; non-object payloads are stored under a `value` key.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { name: name.into(), payload, correlation_id: None }
    }

    /// Attach a correlation id, if there is one.
    pub fn correlated(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    /// Look up a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, Value::Object(self.payload.clone()))?;
        if let Some(id) = &self.correlation_id {
            write!(f, " [{}]", id)?;
        }
        Ok(())
    }
}
