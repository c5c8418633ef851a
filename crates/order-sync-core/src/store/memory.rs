//! In-memory [`KvStore`] implementation for tests and embedders.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Compare-and-swap holds the
//! write lock across the comparison, so it is atomic with respect to every
//! other operation on the same instance.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{KvStore, StoreChange, CHANGE_CHANNEL_CAPACITY};

/// In-memory observable store.
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Snapshot of all keys, sorted. Handy for assertions.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.entries.read() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    fn notify(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        // No subscribers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let old = {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            entries.insert(key.to_string(), value.clone())
        };
        self.notify(key, old, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let old = {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            entries.remove(key)
        };
        self.notify(key, old, None);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool> {
        let old = {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            if entries.get(key) != expected {
                return Ok(false);
            }
            entries.insert(key.to_string(), new.clone())
        };
        self.notify(key, old, Some(new));
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
