use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::warn;
use serde::Serialize;
use serde_json::Value;

/// Process-wide key/value store shared by the workers.
///
/// Values are kept as JSON so producers and consumers only agree on field
/// names, not on Rust types.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<BTreeMap<String, Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A worker that panicked while holding the lock must not take the store down with it.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the value under `key`. Values that fail to serialize are logged and dropped.
    pub fn publish(&self, key: &str, value: impl Serialize) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.lock().insert(key.to_string(), value);
            }
            Err(err) => warn!("not publishing {key}: {err}"),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Snapshot of every key.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        self.lock().clone()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_replaces_previous_value() {
        let store = StateStore::new();
        store.publish("gnss-pos", json!({"fix": "2D"}));
        store.publish("gnss-pos", json!({"fix": "3D"}));
        assert_eq!(store.get("gnss-pos"), Some(json!({"fix": "3D"})));
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn remove_drops_key() {
        let store = StateStore::new();
        store.publish("gnss-state", 1);
        assert_eq!(store.remove("gnss-state"), Some(json!(1)));
        assert_eq!(store.get("gnss-state"), None);
        assert_eq!(store.remove("gnss-state"), None);
    }
}
