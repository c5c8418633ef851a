//! Observable key-value store shared by all execution contexts.
//!
//! The [`KvStore`] trait is the only mutable state contexts share. Every
//! write is broadcast as a [`StoreChange`] to all subscribers, which is how
//! contexts that were not party to a request (a viewer opened later, for
//! instance) learn about guard flips and completed merges.
//!
//! Values are JSON. The typed helpers [`read`] and [`write`] do the serde
//! round trip so callers deal in domain types.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](KvStore::get) | Read one key |
//! | [`set`](KvStore::set) | Write one key and notify |
//! | [`remove`](KvStore::remove) | Delete one key and notify |
//! | [`compare_and_swap`](KvStore::compare_and_swap) | Conditional write used by the fetch guard |
//! | [`subscribe`](KvStore::subscribe) | Receive change notifications |

pub mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change broadcast channel. Slow subscribers that fall
/// further behind than this see a `Lagged` error and skip ahead.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A single key transition, mirroring `chrome.storage.onChanged`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Durable key-value store with change notification.
///
/// Implementations must be `Send + Sync`; one instance is shared through an
/// `Arc` by every context in the process. Writes that leave a key's value
/// unchanged do not broadcast.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a key.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Write `new` only if the key currently holds `expected`
    /// (`None` meaning "absent"). Returns whether the write happened.
    async fn compare_and_swap(&self, key: &str, expected: Option<&Value>, new: Value)
        -> Result<bool>;

    /// Subscribe to all subsequent changes.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Read `key` and deserialize it as `T`.
pub async fn read<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .with_context(|| format!("Failed to decode stored value for '{}'", key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Serialize `value` and write it under `key`.
pub async fn write<T: Serialize + ?Sized>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)
        .with_context(|| format!("Failed to encode value for '{}'", key))?;
    store.set(key, json).await
}

/// Names of the persisted keys.
pub mod keys {
    use crate::models::Site;

    pub const DATA_STORED: &str = "dataStored";
    pub const HOST: &str = "host";

    pub fn session_id(site: Site) -> String {
        format!("{}SessionId", site.as_str())
    }

    pub fn fetching(site: Site) -> String {
        format!("{}Fetching", site.as_str())
    }

    pub fn logged_in(site: Site) -> String {
        format!("{}LoggedIn", site.as_str())
    }

    pub fn order_results(site: Site) -> String {
        format!("{}OrderResults", site.as_str())
    }

}
