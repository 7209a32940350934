use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Typed key/value persistence backing the batch index counter and retry
/// metadata. A read whose stored value has a different type than requested
/// returns the supplied default, as if the key were absent.
pub trait KeyValueStore: Send + Sync {
    fn write_int(&self, key: &str, value: i32);
    fn read_int(&self, key: &str, default: i32) -> i32;
    fn write_long(&self, key: &str, value: i64);
    fn read_long(&self, key: &str, default: i64) -> i64;
    fn write_bool(&self, key: &str, value: bool);
    fn read_bool(&self, key: &str, default: bool) -> bool;
    fn write_string(&self, key: &str, value: &str);
    fn read_string(&self, key: &str, default: &str) -> String;
    fn remove(&self, key: &str);
    fn clear(&self);
}

fn value_as_i64(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64)
}

/// Volatile map-backed store.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    map: RwLock<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn write_int(&self, key: &str, value: i32) {
        self.map.write().insert(key.to_string(), Value::from(value));
    }

    fn read_int(&self, key: &str, default: i32) -> i32 {
        value_as_i64(self.map.read().get(key))
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn write_long(&self, key: &str, value: i64) {
        self.map.write().insert(key.to_string(), Value::from(value));
    }

    fn read_long(&self, key: &str, default: i64) -> i64 {
        value_as_i64(self.map.read().get(key)).unwrap_or(default)
    }

    fn write_bool(&self, key: &str, value: bool) {
        self.map.write().insert(key.to_string(), Value::from(value));
    }

    fn read_bool(&self, key: &str, default: bool) -> bool {
        self.map.read().get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn write_string(&self, key: &str, value: &str) {
        self.map.write().insert(key.to_string(), Value::from(value));
    }

    fn read_string(&self, key: &str, default: &str) -> String {
        self.map
            .read()
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn remove(&self, key: &str) {
        self.map.write().remove(key);
    }

    fn clear(&self) {
        self.map.write().clear();
    }
}

/// File-backed properties store. The whole map is held in memory and
/// rewritten atomically (sibling file + rename) on every mutation, so values
/// survive process death. A missing or unreadable file starts empty.
pub struct PropertiesFile {
    path: PathBuf,
    map: RwLock<HashMap<String, Value>>,
}

impl PropertiesFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("properties file {} is malformed, starting empty: {e}", path.display());
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            map: RwLock::new(map),
        }
    }

    fn persist(&self, map: &HashMap<String, Value>) {
        let serialized = match serde_json::to_string_pretty(map) {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to serialize properties: {e}");
                return;
            }
        };
        let swap = self.path.with_extension("swp");
        let result = std::fs::write(&swap, serialized)
            .and_then(|()| std::fs::rename(&swap, &self.path));
        if let Err(e) = result {
            warn!("failed to persist properties to {}: {e}", self.path.display());
        }
    }

    fn mutate<F: FnOnce(&mut HashMap<String, Value>)>(&self, f: F) {
        let mut map = self.map.write();
        f(&mut map);
        self.persist(&map);
    }
}

impl KeyValueStore for PropertiesFile {
    fn write_int(&self, key: &str, value: i32) {
        self.mutate(|m| {
            m.insert(key.to_string(), Value::from(value));
        });
    }

    fn read_int(&self, key: &str, default: i32) -> i32 {
        value_as_i64(self.map.read().get(key))
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn write_long(&self, key: &str, value: i64) {
        self.mutate(|m| {
            m.insert(key.to_string(), Value::from(value));
        });
    }

    fn read_long(&self, key: &str, default: i64) -> i64 {
        value_as_i64(self.map.read().get(key)).unwrap_or(default)
    }

    fn write_bool(&self, key: &str, value: bool) {
        self.mutate(|m| {
            m.insert(key.to_string(), Value::from(value));
        });
    }

    fn read_bool(&self, key: &str, default: bool) -> bool {
        self.map.read().get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn write_string(&self, key: &str, value: &str) {
        self.mutate(|m| {
            m.insert(key.to_string(), Value::from(value));
        });
    }

    fn read_string(&self, key: &str, default: &str) -> String {
        self.map
            .read()
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn remove(&self, key: &str) {
        self.mutate(|m| {
            m.remove(key);
        });
    }

    fn clear(&self) {
        self.mutate(HashMap::clear);
    }
}
