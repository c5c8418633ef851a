//! The privileged, long-lived context.
//!
//! Owns the order collections: every merge goes through here. Also routes
//! requests that arrive without a site (from the HTTP bridge or the CLI) to
//! the scraper of the site the user last pointed at with `setHost`.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use order_sync_core::models::{Site, StoredOrder};
use order_sync_core::store::{self, keys, KvStore};

use crate::bus::{Endpoint, MessageBus, MessageHandler, Request, Response};
use crate::merge::{load_collection, MergeOutcome, StorageMergeService};

pub struct BackgroundContext {
    store: Arc<dyn KvStore>,
    bus: Arc<MessageBus>,
    merge: StorageMergeService,
}

impl BackgroundContext {
    pub fn new(store: Arc<dyn KvStore>, bus: Arc<MessageBus>) -> Self {
        Self {
            merge: StorageMergeService::new(store.clone()),
            store,
            bus,
        }
    }

    /// Site of the host recorded by the last `setHost`.
    pub async fn current_site(&self) -> Result<Option<Site>> {
        let host: Option<String> = store::read(self.store.as_ref(), keys::HOST).await?;
        Ok(host.as_deref().and_then(Site::from_host))
    }

    async fn forward(&self, site: Site, request: Request) -> Response {
        match self.bus.request(Endpoint::Scraper(site), request).await {
            Ok(response) => response,
            Err(e) => Response::error(e.to_string()),
        }
    }

    async fn store_orders(&self, site: Site, orders: Vec<StoredOrder>) -> Response {
        match self.merge.store_batch(site, orders).await {
            MergeOutcome::Success { stored } => Response::success().with_stored(stored),
            MergeOutcome::Failure(msg) => Response::failure(msg),
        }
    }
}

#[async_trait]
impl MessageHandler for BackgroundContext {
    async fn handle(&self, request: Request) -> Result<Response> {
        let response = match request {
            Request::SetHost { host } => match Site::from_host(&host) {
                Some(site) => {
                    store::write(self.store.as_ref(), keys::HOST, &host).await?;
                    tracing::debug!(%host, %site, "host set");
                    Response::success()
                }
                None => Response::error(format!("unsupported host: {}", host)),
            },
            Request::FetchSiteData { site } => self.forward(site, Request::FetchData).await,
            Request::CheckLoginStatus => match self.current_site().await? {
                Some(site) => self.forward(site, Request::CheckLoginStatus).await,
                None => Response::error("no supported host set"),
            },
            Request::StoreGrubhubData { orders } => self.store_orders(Site::Grubhub, orders).await,
            Request::StoreDoorDashData { orders } => self.store_orders(Site::DoorDash, orders).await,
            Request::GetOrderInsights => {
                let store = self.store.as_ref();
                Response {
                    grubhub_order_results: Some(load_collection(store, Site::Grubhub).await?),
                    doordash_order_results: Some(load_collection(store, Site::DoorDash).await?),
                    ..Response::success()
                }
            }
            Request::FetchData => Response::error("fetchData is served by scraper contexts"),
        };
        Ok(response)
    }
}
