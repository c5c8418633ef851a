//! Read-only viewer context.
//!
//! Loads the stored orders of the current site through the background and
//! normalizes them for display, then follows store changes so a display
//! can show "syncing…" while a cycle runs and reload once it completes.

use anyhow::{bail, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use order_sync_core::insights::{normalize_all, OrderRecord};
use order_sync_core::models::{DataStored, FetchState, Site, StoredOrder};
use order_sync_core::store::{self, keys, KvStore, StoreChange};

use crate::bus::{Endpoint, MessageBus, Request};

/// A store change a viewer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    FetchStarted(Site),
    FetchFinished(Site),
    DataStored(DataStored),
    LoginChanged { site: Site, logged_in: bool },
}

/// Maps a raw store change to a viewer event, if it is one.
pub fn classify(change: &StoreChange) -> Option<ViewerEvent> {
    if change.key == keys::DATA_STORED {
        let value = change.new_value.clone()?;
        return serde_json::from_value(value).ok().map(ViewerEvent::DataStored);
    }

    for site in Site::ALL {
        if change.key == keys::fetching(site) {
            let running = change
                .new_value
                .clone()
                .and_then(|v| serde_json::from_value::<FetchState>(v).ok())
                .is_some_and(|state| state.is_in_progress());
            return Some(if running {
                ViewerEvent::FetchStarted(site)
            } else {
                ViewerEvent::FetchFinished(site)
            });
        }
        if change.key == keys::logged_in(site) {
            let logged_in = change
                .new_value
                .as_ref()
                .and_then(Value::as_bool)
                .unwrap_or(false);
            return Some(ViewerEvent::LoginChanged { site, logged_in });
        }
    }
    None
}

pub struct Viewer {
    store: Arc<dyn KvStore>,
    bus: Arc<MessageBus>,
    changes: broadcast::Receiver<StoreChange>,
}

impl Viewer {
    pub fn new(store: Arc<dyn KvStore>, bus: Arc<MessageBus>) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            bus,
            changes,
        }
    }

    /// Normalized orders of the site the current host belongs to.
    pub async fn load_orders(&self) -> Result<(Site, Vec<OrderRecord>)> {
        let host: Option<String> = store::read(self.store.as_ref(), keys::HOST).await?;
        let Some(site) = host.as_deref().and_then(Site::from_host) else {
            bail!("No supported host set; send setHost first");
        };
        Ok((site, self.load_site_orders(site).await?))
    }

    /// Normalized orders of `site`, newest first.
    pub async fn load_site_orders(&self, site: Site) -> Result<Vec<OrderRecord>> {
        let resp = self
            .bus
            .request(Endpoint::Background, Request::GetOrderInsights)
            .await?;
        if !resp.is_success() {
            bail!(
                "getOrderInsights failed: {}",
                resp.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let raw: Vec<StoredOrder> = match site {
            Site::Grubhub => resp.grubhub_order_results,
            Site::DoorDash => resp.doordash_order_results,
        }
        .unwrap_or_default();
        Ok(normalize_all(site, &raw))
    }

    /// Wait for the next relevant store change. `None` once the store is gone.
    pub async fn next_event(&mut self) -> Option<ViewerEvent> {
        loop {
            match self.changes.recv().await {
                Ok(change) => {
                    if let Some(event) = classify(&change) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "viewer fell behind on store changes");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
