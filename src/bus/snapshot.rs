//! Serializable snapshot of the orchestrator.
//!
//! ```json
//! {
//!   "meta":  { "name": "...", "timestamp": "..." },
//!   "nodes": [{ "id", "name", "priority", "tags", "stats" }],
//!   "ports": [{ "name", "direction", "type", "persistent", "queueLength" }],
//!   "log":   [ ... ]
//! }
//! ```

use crate::bus::log::LogEntry;
use crate::bus::node::NodeStats;
use crate::bus::port::PortDirection;
use crate::bus::types::TypeTag;
use crate::error::{BusError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub name: String,
    pub priority: f64,
    pub tags: BTreeSet<String>,
    pub stats: NodeStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSnapshot {
    pub name: String,
    pub direction: PortDirection,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    pub persistent: bool,
    pub queue_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub nodes: Vec<NodeSnapshot>,
    pub ports: Vec<PortSnapshot>,
    pub log: Vec<LogEntry>,
}

impl Snapshot {
    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn port(&self, name: &str) -> Option<&PortSnapshot> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BusError::Serialization(format!("Failed to serialize snapshot: {}", e)))
    }

    /// Write the snapshot to disk as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?).map_err(|e| {
            BusError::Io(e).with_context(format!("Failed to write snapshot {:?}", path))
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            BusError::Serialization(format!("Failed to parse snapshot {:?}: {}", path, e))
        })
    }
}
