//! Durable key-value stores backing persistence.
//!
//! The orchestrator only needs four operations (`get`, `set`, `delete`,
//! `list_keys`) on JSON values. Every store is namespaced by a prefix so
//! several orchestrators can share one backing location.
//!
//! - [`MemoryStore`] - shared in-process map, cloneable (tests, embedding)
//! - [`FileStore`] - one JSON file per key in a directory

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use serde_json::Value;

/// Default namespace prefix.
pub const DEFAULT_NAMESPACE: &str = "harmonic";

/// Key-value persistence interface.
#[cfg_attr(test, mockall::automock)]
pub trait DurableStore: Send {
    /// Value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Keys in this store's namespace, without the prefix, sorted.
    fn list_keys(&self) -> Result<Vec<String>>;
}

/// `get` with a fallback for missing keys.
pub fn get_or(store: &dyn DurableStore, key: &str, fallback: Value) -> Result<Value> {
    Ok(store.get(key)?.unwrap_or(fallback))
}

/// Prefix handling shared by the store implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    /// Strip the prefix from a namespaced key; `None` if it belongs elsewhere.
    pub fn strip<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
