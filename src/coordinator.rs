//! Single-flight fetch cycles.
//!
//! [`FetchGuard`] owns the `<site>Fetching` flag. Acquiring it is a
//! compare-and-swap from the value just read to a fresh `InProgress`
//! lease, so two triggers racing for the same site cannot both win. A
//! running cycle renews its lease after every remote call; a lease not
//! renewed for `sync.fetch_lease_secs` belongs to a context that died
//! mid-cycle and may be taken over.
//!
//! [`FetchCoordinator`] runs one cycle per trigger:
//!
//! 1. acquire the guard, or report `InProgress` without touching the network
//! 2. note the session id, read the stored collection and pick the page size
//! 3. sample auth and run the [`PaginatedFetcher`], renewing the lease
//! 4. if the lease and the session are still this cycle's, send a non-empty
//!    batch to the background context for merging
//! 5. release the guard and publish `dataStored`, whatever happened above

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use order_sync_core::models::{DataStored, FetchState, Site};
use order_sync_core::store::{self, keys, KvStore};

use crate::bus::{Endpoint, MessageBus, Request, Response};
use crate::config::SyncConfig;
use crate::fetcher::{Checkpoint, PaginatedFetcher};
use crate::merge::load_collection;
use crate::traits::{AuthProbe, OrderSource};

// ═══════════════════════════════════════════════════════════════════════
// FetchGuard
// ═══════════════════════════════════════════════════════════════════════

/// Proof of a successful acquire; needed to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    holder: Uuid,
}

pub struct FetchGuard {
    store: Arc<dyn KvStore>,
    site: Site,
    lease: chrono::Duration,
}

impl FetchGuard {
    pub fn new(store: Arc<dyn KvStore>, site: Site, lease_secs: u64) -> Self {
        Self {
            store,
            site,
            lease: chrono::Duration::seconds(lease_secs as i64),
        }
    }

    /// Current guard state. A missing or unreadable flag reads as `Idle`.
    pub async fn state(&self) -> Result<FetchState> {
        let raw = self.store.get(&keys::fetching(self.site)).await?;
        Ok(self.decode(raw.as_ref()))
    }

    /// True while a cycle holds an unexpired lease.
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.state().await?.is_held(Utc::now(), self.lease))
    }

    fn decode(&self, raw: Option<&serde_json::Value>) -> FetchState {
        match raw {
            None => FetchState::Idle,
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                tracing::warn!(site = %self.site, error = %e, "unreadable fetch flag, treating as idle");
                FetchState::Idle
            }),
        }
    }

    /// Take the guard. `None` when another cycle holds it.
    pub async fn try_acquire(&self) -> Result<Option<Lease>> {
        let key = keys::fetching(self.site);
        let current = self.store.get(&key).await?;
        let now = Utc::now();
        let state = self.decode(current.as_ref());

        if state.is_held(now, self.lease) {
            return Ok(None);
        }
        if let FetchState::InProgress { acquired_at, .. } = state {
            tracing::warn!(site = %self.site, %acquired_at, "taking over an expired fetch lease");
        }

        let holder = Uuid::new_v4();
        let next = FetchState::InProgress {
            holder,
            acquired_at: now,
        };
        let swapped = self
            .store
            .compare_and_swap(&key, current.as_ref(), serde_json::to_value(&next)?)
            .await?;

        Ok(swapped.then_some(Lease { holder }))
    }

    /// Return the guard to `Idle` if `lease` still holds it.
    pub async fn release(&self, lease: &Lease) -> Result<bool> {
        let key = keys::fetching(self.site);
        let current = self.store.get(&key).await?;

        match self.decode(current.as_ref()) {
            FetchState::InProgress { holder, .. } if holder == lease.holder => {
                self.store
                    .compare_and_swap(&key, current.as_ref(), serde_json::to_value(FetchState::Idle)?)
                    .await
            }
            _ => {
                tracing::warn!(site = %self.site, "fetch lease was taken over before release");
                Ok(false)
            }
        }
    }

    /// Push the expiry of `lease` forward. `false` when another cycle has
    /// taken the guard over.
    pub async fn renew(&self, lease: &Lease) -> Result<bool> {
        let key = keys::fetching(self.site);
        let current = self.store.get(&key).await?;

        match self.decode(current.as_ref()) {
            FetchState::InProgress { holder, .. } if holder == lease.holder => {
                let renewed = FetchState::InProgress {
                    holder,
                    acquired_at: Utc::now(),
                };
                self.store
                    .compare_and_swap(&key, current.as_ref(), serde_json::to_value(&renewed)?)
                    .await
            }
            _ => Ok(false),
        }
    }

    /// True while `lease` is the current holder, expired or not.
    pub async fn holds(&self, lease: &Lease) -> Result<bool> {
        Ok(matches!(
            self.state().await?,
            FetchState::InProgress { holder, .. } if holder == lease.holder
        ))
    }

    /// Reset to `Idle` regardless of holder.
    pub async fn force_idle(&self) -> Result<()> {
        store::write(self.store.as_ref(), &keys::fetching(self.site), &FetchState::Idle).await
    }
}

/// Renews a lease at every fetcher checkpoint.
struct LeaseKeeper<'a> {
    guard: &'a FetchGuard,
    lease: Lease,
}

#[async_trait]
impl<'a> Checkpoint for LeaseKeeper<'a> {
    async fn reached(&self) -> bool {
        match self.guard.renew(&self.lease).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(site = %self.guard.site, "fetch lease was taken over mid-cycle");
                false
            }
            // Keep going; the ownership check before merging decides.
            Err(e) => {
                tracing::warn!(site = %self.guard.site, error = %e, "could not renew fetch lease");
                true
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// FetchCoordinator
// ═══════════════════════════════════════════════════════════════════════

/// How a fetch trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The cycle ran; `stored` new orders were merged.
    Success { stored: usize },
    /// Another cycle holds the guard; nothing was done.
    InProgress,
    /// Auth was missing, a page request failed, or the cycle lost its lease
    /// or its session before merging.
    Error(String),
    /// The batch could not be merged.
    StorageFailure(String),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn to_response(&self) -> Response {
        match self {
            FetchOutcome::Success { stored } => Response::success().with_stored(*stored),
            FetchOutcome::InProgress => Response::fetching_in_progress(),
            FetchOutcome::Error(msg) => Response::error(msg.clone()),
            FetchOutcome::StorageFailure(msg) => Response::failure(msg.clone()),
        }
    }
}

pub struct FetchCoordinator {
    site: Site,
    store: Arc<dyn KvStore>,
    bus: Arc<MessageBus>,
    auth: Arc<dyn AuthProbe>,
    fetcher: PaginatedFetcher,
    guard: FetchGuard,
    sync: SyncConfig,
}

impl FetchCoordinator {
    pub fn new(
        source: Arc<dyn OrderSource>,
        auth: Arc<dyn AuthProbe>,
        store: Arc<dyn KvStore>,
        bus: Arc<MessageBus>,
        sync: SyncConfig,
    ) -> Self {
        let site = source.site();
        Self {
            site,
            guard: FetchGuard::new(store.clone(), site, sync.fetch_lease_secs),
            fetcher: PaginatedFetcher::new(source),
            store,
            bus,
            auth,
            sync,
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn guard(&self) -> &FetchGuard {
        &self.guard
    }

    /// Run one cycle unless one is already running for this site.
    pub async fn request_fetch(&self) -> FetchOutcome {
        let site = self.site;
        let lease = match self.guard.try_acquire().await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::info!(%site, "fetch already in progress, not starting another");
                return FetchOutcome::InProgress;
            }
            Err(e) => {
                tracing::error!(%site, error = %e, "cannot read fetch flag");
                return FetchOutcome::Error(format!("{:#}", e));
            }
        };

        tracing::info!(%site, "fetch cycle started");
        let outcome = self.run_cycle(lease).await;

        if let Err(e) = self.guard.release(&lease).await {
            tracing::error!(%site, error = %e, "failed to release fetch flag, forcing it idle");
            if let Err(e) = self.guard.force_idle().await {
                tracing::error!(%site, error = %e, "failed to force fetch flag idle");
            }
        }
        self.publish_data_stored(outcome.is_success()).await;

        match &outcome {
            FetchOutcome::Success { stored } => tracing::info!(%site, stored, "fetch cycle finished"),
            FetchOutcome::Error(msg) => tracing::warn!(%site, error = %msg, "fetch cycle failed"),
            FetchOutcome::StorageFailure(msg) => {
                tracing::error!(%site, error = %msg, "fetched orders were not stored")
            }
            FetchOutcome::InProgress => {}
        }
        outcome
    }

    async fn run_cycle(&self, lease: Lease) -> FetchOutcome {
        let session = match self.session_id().await {
            Ok(session) => session,
            Err(e) => return FetchOutcome::StorageFailure(format!("{:#}", e)),
        };
        let existing = match load_collection(self.store.as_ref(), self.site).await {
            Ok(existing) => existing,
            Err(e) => return FetchOutcome::StorageFailure(format!("{:#}", e)),
        };
        let page_size = if existing.is_empty() {
            self.sync.default_page_size
        } else {
            self.sync.incremental_page_size
        };
        let known_ids: HashSet<String> = existing.into_iter().map(|o| o.id).collect();

        let Some(auth) = self.auth.sample().await else {
            return FetchOutcome::Error(format!("not logged in to {}", self.site));
        };

        let keeper = LeaseKeeper {
            guard: &self.guard,
            lease,
        };
        let batch = match self
            .fetcher
            .fetch_checked(&auth, &known_ids, page_size, &keeper)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return FetchOutcome::Error(e.to_string()),
        };
        if batch.is_empty() {
            tracing::debug!(site = %self.site, "no new orders");
            return FetchOutcome::Success { stored: 0 };
        }

        match self.guard.holds(&lease).await {
            Ok(true) => {}
            Ok(false) => {
                return FetchOutcome::Error(format!(
                    "{} fetch lease was taken over, {} orders discarded",
                    self.site,
                    batch.len()
                ))
            }
            Err(e) => return FetchOutcome::StorageFailure(format!("{:#}", e)),
        }
        match self.session_id().await {
            Ok(current) if current == session => {}
            Ok(_) => {
                return FetchOutcome::Error(format!(
                    "{} session changed during the fetch, {} orders discarded",
                    self.site,
                    batch.len()
                ))
            }
            Err(e) => return FetchOutcome::StorageFailure(format!("{:#}", e)),
        }

        let count = batch.len();
        match self
            .bus
            .request(Endpoint::Background, Request::store_data(self.site, batch))
            .await
        {
            Ok(resp) if resp.is_success() => FetchOutcome::Success {
                stored: resp.stored.unwrap_or(count),
            },
            Ok(resp) => FetchOutcome::StorageFailure(
                resp.error
                    .unwrap_or_else(|| "background refused the orders".to_string()),
            ),
            Err(e) => FetchOutcome::StorageFailure(e.to_string()),
        }
    }

    async fn session_id(&self) -> Result<Option<String>> {
        store::read(self.store.as_ref(), &keys::session_id(self.site)).await
    }

    async fn publish_data_stored(&self, ok: bool) {
        let flag = DataStored {
            site: self.site,
            ok,
            at: Utc::now(),
        };
        if let Err(e) = store::write(self.store.as_ref(), keys::DATA_STORED, &flag).await {
            tracing::error!(site = %self.site, error = %e, "failed to publish dataStored");
        }
    }
}
