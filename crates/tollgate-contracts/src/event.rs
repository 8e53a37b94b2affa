//! Telemetry event and agent identity types.
//!
//! `Event` is what every component hands to the telemetry client. Once built
//! it is never modified; the client serializes it as-is into a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of event kinds understood by the telemetry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ToolCall,
    LlmInvoke,
    DataAccess,
    ApiCall,
    FileWrite,
    Decision,
    PolicyViolation,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolCall => "tool_call",
            EventType::LlmInvoke => "llm_invoke",
            EventType::DataAccess => "data_access",
            EventType::ApiCall => "api_call",
            EventType::FileWrite => "file_write",
            EventType::Decision => "decision",
            EventType::PolicyViolation => "policy_violation",
        }
    }
}

/// One immutable telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id; lets the backend de-duplicate re-delivered batches.
    pub id: uuid::Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub name: String,
    pub payload: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time and a fresh id.
    pub fn new(event_type: EventType, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_type,
            name: name.into(),
            payload: Map::new(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style payload field.
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Builder-style metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The wire form posted in `{events: [...]}`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Identity assigned by the backend.
///
/// `agent_id` comes from manual registration and gates event delivery;
/// `fleet_agent_id` comes from fleet auto-registration and gates heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: Option<String>,
    pub fleet_agent_id: Option<String>,
}
