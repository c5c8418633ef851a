//! Merging fetched batches into a site's persisted order collection.
//!
//! Runs in the background context on behalf of a scraper. New records go
//! in front of what is already stored, so the collection stays newest
//! first. The caller has already dropped known ids; the merge does not
//! check again.

use anyhow::Result;
use std::sync::Arc;

use order_sync_core::models::{Site, StoredOrder};
use order_sync_core::store::{self, keys, KvStore};

/// Result of one merge, as reported back over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Success { stored: usize },
    Failure(String),
}

/// Read the order collection of `site`. A missing key is an empty collection.
pub async fn load_collection(store: &dyn KvStore, site: Site) -> Result<Vec<StoredOrder>> {
    Ok(store::read(store, &keys::order_results(site))
        .await?
        .unwrap_or_default())
}

pub struct StorageMergeService {
    store: Arc<dyn KvStore>,
}

impl StorageMergeService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Prepend `new_records` to the collection of `site` and persist it.
    pub async fn store_batch(&self, site: Site, new_records: Vec<StoredOrder>) -> MergeOutcome {
        let count = new_records.len();
        match self.merge(site, new_records).await {
            Ok(total) => {
                tracing::info!(%site, stored = count, total, "merged orders");
                MergeOutcome::Success { stored: count }
            }
            Err(e) => {
                tracing::error!(%site, error = %e, "failed to persist orders");
                MergeOutcome::Failure(format!("{:#}", e))
            }
        }
    }

    async fn merge(&self, site: Site, mut new_records: Vec<StoredOrder>) -> Result<usize> {
        let existing = load_collection(self.store.as_ref(), site).await?;
        new_records.extend(existing);
        store::write(self.store.as_ref(), &keys::order_results(site), &new_records).await?;
        Ok(new_records.len())
    }
}
