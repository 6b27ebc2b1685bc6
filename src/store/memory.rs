//! In-memory store. Clones share the same map.

use super::{DurableStore, Namespace};
use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    ns: Namespace,
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            ns: Namespace::new(prefix),
            entries: Arc::default(),
        }
    }

    /// Another namespace over the same backing map.
    pub fn namespaced(&self, prefix: impl Into<String>) -> Self {
        Self {
            ns: Namespace::new(prefix),
            entries: Arc::clone(&self.entries),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries().get(&self.ns.key(key)).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.entries().insert(self.ns.key(key), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(&self.ns.key(key));
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()
            .keys()
            .filter_map(|k| self.ns.strip(k).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_delete() {
        let store = MemoryStore::new("t");
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", &json!(1)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let a = MemoryStore::new("a");
        let b = a.namespaced("b");
        a.set("state", &json!("from a")).unwrap();
        b.set("state", &json!("from b")).unwrap();
        b.set("extra", &json!(true)).unwrap();

        assert_eq!(a.get("state").unwrap(), Some(json!("from a")));
        assert_eq!(a.list_keys().unwrap(), vec!["state".to_string()]);
        assert_eq!(
            b.list_keys().unwrap(),
            vec!["extra".to_string(), "state".to_string()]
        );
    }

    #[test]
    fn test_clones_share_data() {
        let store = MemoryStore::new("t");
        let other = store.clone();
        store.set("k", &json!([1, 2])).unwrap();
        assert_eq!(other.get("k").unwrap(), Some(json!([1, 2])));
    }
}
