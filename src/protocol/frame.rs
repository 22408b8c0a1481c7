use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::CorrelationId;

/// Outbound request: the envelope handed to the transport for every
/// [`request`](crate::RequestCorrelator::request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: CorrelationId,
    pub command: Arc<str>,
    pub payload: Value,
}

/// Inbound answer to a previously sent [`RequestFrame`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub id: CorrelationId,
    pub outcome: Result<Value, RemoteError>,
}

impl ResponseFrame {
    /// Successful response carrying `result`.
    pub fn ok(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    /// Failed response carrying the peer's error object.
    pub fn err(id: CorrelationId, error: RemoteError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// Application-defined event pushed by the peer outside any request.
///
/// The only field the core looks at is the `type` discriminator; everything
/// else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushedEvent {
    // ---
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PushedEvent {
    /// Event of the given type with no extra fields.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            fields: Map::new(),
        }
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Connection lifecycle change reported by the transport itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFrame {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every kind of frame a transport can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response(ResponseFrame),
    Event(PushedEvent),
    Lifecycle(LifecycleFrame),
}
