//! Named event streams.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::message::{Message, Metadata};

/// Name of an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Result<Self, BridgeError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidStreamName("stream name must not be empty".to_string()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StreamName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamName {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

/// A stream as handed to `create`: its name, initial events and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    name: StreamName,
    events: Vec<Message>,
    metadata: Metadata,
}

impl Stream {
    pub fn new(name: StreamName, events: Vec<Message>) -> Self {
        Self {
            name,
            events,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Same stream (name and metadata) carrying a different event sequence.
    pub fn with_events(self, events: Vec<Message>) -> Self {
        Self { events, ..self }
    }

    /// Append events at the end of the stream.
    pub fn extend_events(&mut self, events: impl IntoIterator<Item = Message>) {
        self.events.extend(events);
    }

    pub fn name(&self) -> &StreamName {
        &self.name
    }

    pub fn events(&self) -> &[Message] {
        &self.events
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn into_events(self) -> Vec<Message> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_stream_name_is_rejected() {
        assert!(matches!(StreamName::new(" "), Err(BridgeError::InvalidStreamName(_))));
        assert!(serde_json::from_value::<StreamName>(json!("")).is_err());
    }

    #[test]
    fn with_events_keeps_name_and_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("owner".to_string(), json!("sales"));
        let stream = Stream::new(StreamName::new("orders").unwrap(), vec![])
            .with_metadata(metadata.clone());

        let replaced = stream.with_events(vec![Message::event("OrderPlaced", json!({}))]);
        assert_eq!(replaced.name().as_str(), "orders");
        assert_eq!(replaced.metadata(), &metadata);
        assert_eq!(replaced.events().len(), 1);
    }
}
