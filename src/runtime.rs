//! Wiring of the execution contexts.
//!
//! A [`Runtime`] owns one shared store and one message bus, registers the
//! background context and a scraper context per site, and hands out
//! viewers. Contexts only ever see each other through the bus and the
//! store.
//!
//! [`Runtime::start`] takes ready-made sources and probes so tests can run
//! the whole engine against fakes; [`Runtime::from_config`] builds the real
//! connectors and the SQLite store.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use order_sync_core::models::Site;
use order_sync_core::store::KvStore;

use crate::auth::CredentialsFileProbe;
use crate::background::BackgroundContext;
use crate::bus::{Endpoint, MessageBus};
use crate::config::{Config, HttpConfig};
use crate::connector_doordash::DoorDashSource;
use crate::connector_grubhub::GrubhubSource;
use crate::coordinator::FetchCoordinator;
use crate::scraper::ScraperContext;
use crate::session::SessionMonitor;
use crate::sqlite_store::SqliteKv;
use crate::traits::{AuthProbe, OrderSource};
use crate::viewer::Viewer;

/// Site-facing pieces of one scraper context.
pub struct SiteWiring {
    pub source: Arc<dyn OrderSource>,
    pub auth: Arc<dyn AuthProbe>,
}

pub struct Runtime {
    store: Arc<dyn KvStore>,
    bus: Arc<MessageBus>,
    scrapers: BTreeMap<Site, Arc<ScraperContext>>,
    listeners: Vec<JoinHandle<()>>,
}

/// HTTP client shared by the connectors.
pub fn http_client(config: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")
}

impl Runtime {
    /// Register the background context and one scraper per wired site.
    pub async fn start(store: Arc<dyn KvStore>, config: &Config, sites: Vec<SiteWiring>) -> Self {
        let bus = Arc::new(MessageBus::new(Duration::from_secs(
            config.bus.request_timeout_secs,
        )));
        let mut listeners = Vec::new();

        let background = Arc::new(BackgroundContext::new(store.clone(), bus.clone()));
        listeners.push(bus.register(Endpoint::Background, background).await);

        let mut scrapers = BTreeMap::new();
        for SiteWiring { source, auth } in sites {
            let site = source.site();
            let coordinator = Arc::new(FetchCoordinator::new(
                source,
                auth.clone(),
                store.clone(),
                bus.clone(),
                config.sync.clone(),
            ));
            let monitor = Arc::new(SessionMonitor::new(
                auth,
                store.clone(),
                coordinator.clone(),
                config.session.clone(),
            ));
            let scraper = Arc::new(ScraperContext::new(monitor, coordinator));
            listeners.push(bus.register(Endpoint::Scraper(site), scraper.clone()).await);
            scrapers.insert(site, scraper);
        }

        tracing::info!(sites = ?scrapers.keys().collect::<Vec<_>>(), "contexts registered");
        Self {
            store,
            bus,
            scrapers,
            listeners,
        }
    }

    /// Open the configured database and wire every `[sites.*]` table.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(SqliteKv::open(config).await?);
        let client = http_client(&config.http)?;

        let mut sites = Vec::new();
        for site in config.sites.configured() {
            let Some(site_config) = config.sites.get(site) else {
                continue;
            };
            let source: Arc<dyn OrderSource> = match site {
                Site::Grubhub => Arc::new(GrubhubSource::new(
                    client.clone(),
                    site_config.base_url.clone(),
                )),
                Site::DoorDash => Arc::new(DoorDashSource::new(
                    client.clone(),
                    site_config.base_url.clone(),
                )),
            };
            let auth: Arc<dyn AuthProbe> = Arc::new(CredentialsFileProbe::new(
                site,
                site_config.credentials.clone(),
                site_config.auth_cookie.clone(),
            ));
            sites.push(SiteWiring { source, auth });
        }

        Ok(Self::start(store, config, sites).await)
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    pub fn sites(&self) -> Vec<Site> {
        self.scrapers.keys().copied().collect()
    }

    pub fn scraper(&self, site: Site) -> Option<Arc<ScraperContext>> {
        self.scrapers.get(&site).cloned()
    }

    pub fn viewer(&self) -> Viewer {
        Viewer::new(self.store.clone(), self.bus.clone())
    }

    /// Run every scraper's start-up sequence in its own task.
    pub fn spawn_scrapers(&self) -> Vec<JoinHandle<()>> {
        self.scrapers
            .values()
            .cloned()
            .map(|scraper| {
                tokio::spawn(async move {
                    let site = scraper.site();
                    match scraper.run().await {
                        Ok(Some(check)) => tracing::info!(%site, action = ?check.action, "scraper started"),
                        Ok(None) => tracing::info!(%site, "scraper idle, never saw a login"),
                        Err(e) => tracing::error!(%site, error = %e, "scraper start-up failed"),
                    }
                })
            })
            .collect()
    }

    /// Unregister every endpoint and stop the listeners.
    pub async fn shutdown(self) {
        self.bus.unregister(Endpoint::Background).await;
        for site in self.scrapers.keys() {
            self.bus.unregister(Endpoint::Scraper(*site)).await;
        }
        for listener in self.listeners {
            listener.abort();
        }
    }
}
