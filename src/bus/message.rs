//! Messages flowing through ports.
//!
//! A `Message` is only ever built by a port (`Message::create`) or by the
//! restore path (`Message::rehydrate`, which keeps the original id and
//! timestamp so restoring the same record twice yields identical queues).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form key/value annotations attached to a message.
pub type Metadata = BTreeMap<String, Value>;

/// Immutable message envelope.
///
/// Serializes for snapshots and logs but cannot be deserialized; stored
/// messages come back through [`Message::rehydrate`].
///
/// ```compile_fail
/// let msg: harmonic_bus::Message = serde_json::from_value(serde_json::json!({})).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    id: String,
    port: String,
    data: Value,
    timestamp: DateTime<Utc>,
    metadata: Metadata,
}

impl Message {
    pub(crate) fn create(port: &str, data: Value, metadata: Metadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            port: port.to_string(),
            data,
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Rebuild a message from its persisted form, keeping id and timestamp.
    pub fn rehydrate(port: &str, stored: QueuedMessage) -> Self {
        Self {
            id: stored.id,
            port: port.to_string(),
            data: stored.data,
            timestamp: stored.timestamp,
            metadata: stored.metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Consume the envelope and keep the payload.
    pub fn into_data(self) -> Value {
        self.data
    }

    /// Persisted form (the port name is the key of the enclosing map).
    pub fn to_queued(&self) -> QueuedMessage {
        QueuedMessage {
            id: self.id.clone(),
            timestamp: self.timestamp,
            data: self.data.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A queued message as stored in the durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_assigns_unique_ids() {
        let a = Message::create("p", json!(1), Metadata::new());
        let b = Message::create("p", json!(1), Metadata::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.port(), "p");
    }

    #[test]
    fn test_rehydrate_preserves_identity() {
        let original = Message::create("jobs", json!({"n": 3}), Metadata::new());
        let restored = Message::rehydrate("jobs", original.to_queued());
        assert_eq!(restored, original);
    }

    #[test]
    fn test_metadata_is_owned_copy() {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), json!("cli"));
        let msg = Message::create("p", json!(null), meta.clone());
        meta.insert("source".to_string(), json!("changed"));
        assert_eq!(msg.metadata().get("source"), Some(&json!("cli")));
    }
}
