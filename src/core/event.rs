//! Events sent to a machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved event type evaluated automatically after every state entry.
pub const ALWAYS: &str = "@always";

/// Where an event came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Sent by a caller.
    #[default]
    External,
    /// Produced by the engine itself (lifecycle records, raised events).
    Internal,
}

/// The unit sent to a machine.
///
/// Envelopes are transactional by default: everything a step records is
/// persisted atomically or not at all.
///
/// # Example
///
/// ```rust
/// use eventchart::core::EventEnvelope;
/// use serde_json::json;
///
/// let event = EventEnvelope::new("ADD")
///     .with_payload(json!({ "value": 5 }))
///     .with_actor("user-42");
///
/// assert_eq!(event.event_type, "ADD");
/// assert_eq!(event.payload_value("value"), Some(&json!(5)));
/// assert!(event.transactional);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_transactional")]
    pub transactional: bool,
    #[serde(default)]
    pub source: EventSource,
}

fn default_version() -> u32 {
    1
}

fn default_transactional() -> bool {
    true
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            actor: None,
            version: default_version(),
            transactional: default_transactional(),
            source: EventSource::External,
        }
    }

    /// An event produced by the engine rather than a caller.
    pub fn internal(event_type: impl Into<String>) -> Self {
        Self::new(event_type).with_source(EventSource::Internal)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Persist this event's step on a best-effort basis instead of atomically.
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Look up a top-level key of an object payload.
    pub fn payload_value(&self, key: &str) -> Option<&Value> {
        self.payload.as_ref()?.as_object()?.get(key)
    }

    pub fn is_always(&self) -> bool {
        self.event_type == ALWAYS
    }
}

impl From<&str> for EventEnvelope {
    fn from(event_type: &str) -> Self {
        Self::new(event_type)
    }
}

impl From<String> for EventEnvelope {
    fn from(event_type: String) -> Self {
        Self::new(event_type)
    }
}
