//! Per-site sync status.
//!
//! Reads the flags every context writes and prints one line per configured
//! site: login state, whether a cycle is running, how many orders are
//! stored, and when the last cycle ended. Used by `osync status`.

use anyhow::Result;
use chrono::{DateTime, Utc};

use order_sync_core::models::{DataStored, FetchState, Site};
use order_sync_core::store::{self, keys, KvStore};

use crate::config::Config;
use crate::merge::load_collection;
use crate::sqlite_store::SqliteKv;

/// Snapshot of one site's flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteStatus {
    pub site: Site,
    pub logged_in: bool,
    pub has_session: bool,
    pub fetch: FetchState,
    pub orders: usize,
    /// Outcome of the last cycle, when the last cycle was this site's.
    pub last_cycle: Option<DataStored>,
}

pub async fn collect_status(store: &dyn KvStore, sites: &[Site]) -> Result<Vec<SiteStatus>> {
    let last: Option<DataStored> = store::read(store, keys::DATA_STORED).await?;

    let mut out = Vec::with_capacity(sites.len());
    for &site in sites {
        let session: Option<String> = store::read(store, &keys::session_id(site)).await?;
        out.push(SiteStatus {
            site,
            logged_in: store::read(store, &keys::logged_in(site))
                .await?
                .unwrap_or(false),
            has_session: session.is_some(),
            fetch: store::read(store, &keys::fetching(site))
                .await
                .ok()
                .flatten()
                .unwrap_or_default(),
            orders: load_collection(store, site).await?.len(),
            last_cycle: last.clone().filter(|d| d.site == site),
        });
    }
    Ok(out)
}

/// Run the status command: open the store and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = SqliteKv::open(config).await?;
    let sites = config.sites.configured();
    let statuses = collect_status(&store, &sites).await?;
    let host: Option<String> = store::read(&store, keys::HOST).await?;

    println!("order-sync status");
    println!("=================");
    println!();
    println!("  Database:  {}", config.db.path.display());
    println!("  Host:      {}", host.as_deref().unwrap_or("(not set)"));
    println!();

    if statuses.is_empty() {
        println!("  No sites configured. Add [sites.grubhub] or [sites.doordash].");
    } else {
        println!(
            "  {:<10} {:<10} {:<12} {:>7}   {}",
            "SITE", "LOGIN", "FETCH", "ORDERS", "LAST CYCLE"
        );
        println!("  {}", "-".repeat(60));
        let now = Utc::now();
        for s in &statuses {
            let login = match (s.logged_in, s.has_session) {
                (true, _) => "yes",
                (false, true) => "no",
                (false, false) => "never",
            };
            let fetch = if s.fetch.is_in_progress() {
                "running"
            } else {
                "idle"
            };
            let last = match &s.last_cycle {
                Some(d) => format!(
                    "{} ({})",
                    format_relative(d.at, now),
                    if d.ok { "ok" } else { "failed" }
                ),
                None => "-".to_string(),
            };
            println!(
                "  {:<10} {:<10} {:<12} {:>7}   {}",
                s.site, login, fetch, s.orders, last
            );
        }
    }
    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();

    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}
