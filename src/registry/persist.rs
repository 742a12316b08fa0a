use crate::sync::{read, write};
use anyhow::Context;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Storage backend for persisted state cells.
///
/// Adapters hold JSON values by key. A registry carries one adapter that
/// every persisted cell uses unless the cell brings its own.
pub trait PersistAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// Process-local adapter, the registry default.
#[derive(Debug, Default)]
pub struct MemoryPersist {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPersist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, as if it had been persisted earlier.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        write(&self.values).insert(key.into(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = read(&self.values).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PersistAdapter for MemoryPersist {
    fn get(&self, key: &str) -> Option<Value> {
        read(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        write(&self.values).insert(key.to_string(), value);
        Ok(())
    }
}

/// Keeps every persisted value in one JSON object on disk.
///
/// The file is read once when opened and rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFilePersist {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFilePersist {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistAdapter for JsonFilePersist {
    fn get(&self, key: &str) -> Option<Value> {
        read(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut values = write(&self.values);
        values.insert(key.to_string(), value);
        let raw = serde_json::to_vec_pretty(&*values)?;
        fs::write(&self.path, raw).with_context(|| format!("writing {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_adapter_stores_by_key() {
        let adapter = MemoryPersist::new();
        adapter.set("b", json!(2)).unwrap();
        adapter.insert("a", json!(1));
        assert_eq!(adapter.get("a"), Some(json!(1)));
        assert_eq!(adapter.get("missing"), None);
        assert_eq!(adapter.keys(), vec!["a", "b"]);
    }

    #[test]
    fn file_adapter_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let adapter = JsonFilePersist::open(&path).unwrap();
        adapter.set("theme", json!("dark")).unwrap();
        adapter.set("count", json!(3)).unwrap();

        let reopened = JsonFilePersist::open(&path).unwrap();
        assert_eq!(reopened.get("theme"), Some(json!("dark")));
        assert_eq!(reopened.get("count"), Some(json!(3)));
    }

    #[test]
    fn file_adapter_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        let err = JsonFilePersist::open(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
