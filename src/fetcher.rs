//! Incremental, deduplicating pagination over one [`OrderSource`].
//!
//! A fetch walks pages from the front of the order history and keeps only
//! records whose id is not yet stored. Pages are requested strictly one
//! after another; the walk stops on the first page that is empty, has
//! nothing new, is short, or is the last one (see
//! [`order_sync_core::pagination::next_step`]).
//!
//! Any page failure aborts the whole fetch. Detail lookups are the
//! exception: they run after paging, one per new record, and a failed
//! lookup only leaves that record without its detail.
//!
//! After every page and every detail lookup the fetcher reports to a
//! [`Checkpoint`]. The coordinator uses it to renew its fetch lease; a
//! checkpoint that answers `false` ends the fetch with
//! [`FetchError::LeaseLost`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use order_sync_core::models::{AuthSignal, StoredOrder};
use order_sync_core::pagination::{next_step, PageCursor, Step};

use crate::error::FetchError;
use crate::traits::OrderSource;

/// Progress hook called between remote calls.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// `false` aborts the fetch.
    async fn reached(&self) -> bool;
}

/// Checkpoint that never aborts.
pub struct Unguarded;

#[async_trait]
impl Checkpoint for Unguarded {
    async fn reached(&self) -> bool {
        true
    }
}

pub struct PaginatedFetcher {
    source: Arc<dyn OrderSource>,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn OrderSource>) -> Self {
        Self { source }
    }

    /// Fetch every record not in `known_ids`, newest first.
    pub async fn fetch_incremental(
        &self,
        auth: &AuthSignal,
        known_ids: &HashSet<String>,
        page_size: u32,
    ) -> Result<Vec<StoredOrder>, FetchError> {
        self.fetch_checked(auth, known_ids, page_size, &Unguarded).await
    }

    /// [`fetch_incremental`](Self::fetch_incremental), reporting to
    /// `checkpoint` after each remote call.
    pub async fn fetch_checked(
        &self,
        auth: &AuthSignal,
        known_ids: &HashSet<String>,
        page_size: u32,
        checkpoint: &dyn Checkpoint,
    ) -> Result<Vec<StoredOrder>, FetchError> {
        let site = self.source.site();
        let mut cursor = PageCursor::first(site, page_size);
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch: Vec<StoredOrder> = Vec::new();
        let mut pages = 0u32;

        loop {
            let page = self.source.fetch_page(auth, &cursor).await?;
            pages += 1;
            if !checkpoint.reached().await {
                return Err(FetchError::LeaseLost);
            }
            let fetched_at = Utc::now();
            let received = page.records.len();

            let mut fresh = 0usize;
            for raw in page.records {
                let id = self.source.record_id(&raw).ok_or_else(|| {
                    FetchError::Malformed(format!("{} record without an id", site))
                })?;
                if known_ids.contains(&id) || !seen.insert(id.clone()) {
                    continue;
                }
                fresh += 1;
                batch.push(StoredOrder {
                    id,
                    fetched_at,
                    raw,
                    detail: None,
                });
            }

            match next_step(&cursor, received, fresh, page.pager.as_ref()) {
                Step::Continue(next) => cursor = next,
                Step::Stop(reason) => {
                    tracing::debug!(%site, pages, new = batch.len(), ?reason, "pagination finished");
                    break;
                }
            }
        }

        if self.source.has_details() {
            self.attach_details(auth, &mut batch, checkpoint).await?;
        }

        Ok(batch)
    }

    async fn attach_details(
        &self,
        auth: &AuthSignal,
        batch: &mut [StoredOrder],
        checkpoint: &dyn Checkpoint,
    ) -> Result<(), FetchError> {
        let site = self.source.site();
        for order in batch.iter_mut() {
            match self.source.fetch_detail(auth, &order.id).await {
                Ok(detail) => order.detail = Some(detail),
                Err(e) => {
                    tracing::warn!(%site, order_id = %order.id, error = %e, "detail lookup failed, keeping order without it");
                }
            }
            if !checkpoint.reached().await {
                return Err(FetchError::LeaseLost);
            }
        }
        Ok(())
    }
}
