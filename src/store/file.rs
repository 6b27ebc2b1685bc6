//! Directory-backed store: one pretty-printed JSON file per key.
//!
//! File names are `<prefix>.<escaped key>.json`. Characters outside
//! `[A-Za-z0-9_-]` are escaped as `%XX` so keys round-trip through
//! `list_keys`. Writes go to a temporary file first and are renamed into
//! place.

use super::{DurableStore, Namespace};
use crate::error::{BusError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

const EXTENSION: &str = ".json";

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    ns: Namespace,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            BusError::Store(format!("Failed to create store directory {:?}: {}", dir, e))
        })?;
        Ok(Self {
            dir,
            ns: Namespace::new(prefix),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.ns.key(&escape(key)), EXTENSION))
    }
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn unescape(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BusError::Store(format!("Failed to read {:?}: {}", path, e)));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BusError::Store(format!("Failed to parse {:?}: {}", path, e)))
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, content)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| BusError::Store(format!("Failed to write {:?}: {}", path, e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BusError::Store(format!("Failed to delete {:?}: {}", path, e))),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            BusError::Store(format!("Failed to list {:?}: {}", self.dir, e))
        })?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            if let Some(key) = self.ns.strip(stem).and_then(unescape) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), "bus").unwrap();
        assert_eq!(store.get("state").unwrap(), None);

        store.set("state", &json!({"log": [], "portQueues": {}})).unwrap();
        let reopened = FileStore::open(dir.path(), "bus").unwrap();
        assert_eq!(
            reopened.get("state").unwrap(),
            Some(json!({"log": [], "portQueues": {}}))
        );

        reopened.delete("state").unwrap();
        reopened.delete("state").unwrap();
        assert_eq!(store.get("state").unwrap(), None);
    }

    #[test]
    fn test_list_keys_escapes_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileStore::open(dir.path(), "a").unwrap();
        let b = FileStore::open(dir.path(), "b").unwrap();
        a.set("queue/jobs in", &json!(1)).unwrap();
        a.set("state", &json!(2)).unwrap();
        b.set("state", &json!(3)).unwrap();

        assert_eq!(
            a.list_keys().unwrap(),
            vec!["queue/jobs in".to_string(), "state".to_string()]
        );
        assert_eq!(b.list_keys().unwrap(), vec!["state".to_string()]);
        assert_eq!(a.get("queue/jobs in").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), "bus").unwrap();
        std::fs::write(dir.path().join("bus.state.json"), "{not json").unwrap();
        assert!(matches!(store.get("state"), Err(BusError::Store(_))));
    }

    #[test]
    fn test_escape_round_trip() {
        for key in ["plain", "with space", "a/b.c", "ünï"] {
            assert_eq!(unescape(&escape(key)).as_deref(), Some(key));
        }
    }
}
