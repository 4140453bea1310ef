//! Messages: the unit carried by both the store (as events) and the bus (as commands/events).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::MessageId;

/// Metadata attached to a message.
pub type Metadata = BTreeMap<String, JsonValue>;

/// What a message represents.
///
/// The bridge never enforces this; whatever the bus is currently dispatching
/// is treated as the command that caused the writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Command,
    Event,
    Query,
}

/// Immutable message record.
///
/// "Modifying" a message (e.g. adding metadata) produces a new value; identity,
/// name and payload never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    name: String,
    kind: MessageKind,
    payload: JsonValue,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageKind, name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: MessageId::new(),
            name: name.into(),
            kind,
            payload,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn command(name: impl Into<String>, payload: JsonValue) -> Self {
        Self::new(MessageKind::Command, name, payload)
    }

    pub fn event(name: impl Into<String>, payload: JsonValue) -> Self {
        Self::new(MessageKind::Event, name, payload)
    }

    /// Replace the generated identifier (fixtures, messages received from elsewhere).
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    /// Return this message with `key` set to `value`.
    ///
    /// Other keys are left untouched; an existing value under `key` is replaced.
    pub fn with_added_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&JsonValue> {
        self.metadata.get(key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn added_metadata_keeps_identity_and_payload() {
        let original = Message::event("OrderPlaced", json!({"order": 1}))
            .with_added_metadata("tenant", "acme");
        let enriched = original.clone().with_added_metadata("_causation_id", "42");

        assert_eq!(enriched.id(), original.id());
        assert_eq!(enriched.payload(), original.payload());
        assert_eq!(enriched.metadata_value("tenant"), Some(&json!("acme")));
        assert_eq!(enriched.metadata_value("_causation_id"), Some(&json!("42")));
        assert!(original.metadata_value("_causation_id").is_none());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let msg = Message::command("PlaceOrder", json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], json!("command"));
    }
}
