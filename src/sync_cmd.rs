//! Commands that start the engine: `sync`, `insights`, `watch`, `run`.
//!
//! Each builds a [`Runtime`] from the config. Store change notifications
//! only reach subscribers in the same process, so `watch` runs the
//! scrapers itself rather than observing another `osync` process.

use anyhow::{bail, Result};

use order_sync_core::models::Site;

use crate::config::Config;
use crate::coordinator::FetchOutcome;
use crate::runtime::Runtime;
use crate::server;
use crate::session::LoginAction;
use crate::viewer::{Viewer, ViewerEvent};

/// Run one active session check and fetch cycle for `site`.
pub async fn run_sync(config: &Config, site: Site) -> Result<()> {
    let runtime = Runtime::from_config(config).await?;
    let Some(scraper) = runtime.scraper(site) else {
        bail!("Site '{}' is not configured. Add a [sites.{}] table.", site, site);
    };

    let check = scraper.sync_now().await?;
    let result = match &check.action {
        LoginAction::LoggedOut => {
            println!("{}: not logged in (no usable credentials)", site);
            Ok(())
        }
        LoginAction::SkippedInProgress => {
            println!("{}: a fetch cycle is already running", site);
            Ok(())
        }
        LoginAction::FetchTriggered(outcome) => report_outcome(site, outcome),
        LoginAction::Passive | LoginAction::SessionReset => {
            println!("{}: session recorded, no fetch ran", site);
            Ok(())
        }
    };

    runtime.shutdown().await;
    result
}

fn report_outcome(site: Site, outcome: &FetchOutcome) -> Result<()> {
    match outcome {
        FetchOutcome::Success { stored } => {
            println!("{}: {} new order{} stored", site, stored, if *stored == 1 { "" } else { "s" });
            Ok(())
        }
        FetchOutcome::InProgress => {
            println!("{}: a fetch cycle is already running", site);
            Ok(())
        }
        FetchOutcome::Error(msg) => bail!("{}: fetch failed: {}", site, msg),
        FetchOutcome::StorageFailure(msg) => bail!("{}: orders not stored: {}", site, msg),
    }
}

/// Print normalized orders as JSON lines, newest first.
///
/// Without `site`, the site of the last `setHost` is used.
pub async fn run_insights(config: &Config, site: Option<Site>) -> Result<()> {
    let runtime = Runtime::from_config(config).await?;
    let viewer = runtime.viewer();

    let records = match site {
        Some(site) => viewer.load_site_orders(site).await,
        None => viewer.load_orders().await.map(|(_, records)| records),
    };
    runtime.shutdown().await;

    for record in records? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Start the scrapers and print viewer events until interrupted.
pub async fn run_watch(config: &Config) -> Result<()> {
    let runtime = Runtime::from_config(config).await?;
    let mut viewer = runtime.viewer();
    let _scrapers = runtime.spawn_scrapers();

    loop {
        tokio::select! {
            event = viewer.next_event() => match event {
                Some(event) => println!("{}", describe(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    runtime.shutdown().await;
    Ok(())
}

/// Start every context and serve the HTTP bridge.
pub async fn run_service(config: &Config) -> Result<()> {
    let runtime = Runtime::from_config(config).await?;
    let _scrapers = runtime.spawn_scrapers();
    tokio::spawn(log_events(runtime.viewer()));

    tokio::select! {
        served = server::run_server(config, runtime.bus()) => served?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
    }

    runtime.shutdown().await;
    Ok(())
}

async fn log_events(mut viewer: Viewer) {
    while let Some(event) = viewer.next_event().await {
        tracing::info!(event = %describe(&event), "store change");
    }
}

fn describe(event: &ViewerEvent) -> String {
    match event {
        ViewerEvent::FetchStarted(site) => format!("{}: syncing…", site),
        ViewerEvent::FetchFinished(site) => format!("{}: idle", site),
        ViewerEvent::DataStored(flag) => format!(
            "{}: cycle {} at {}",
            flag.site,
            if flag.ok { "completed" } else { "failed" },
            flag.at.format("%Y-%m-%d %H:%M:%S")
        ),
        ViewerEvent::LoginChanged { site, logged_in } => {
            format!("{}: {}", site, if *logged_in { "logged in" } else { "logged out" })
        }
    }
}
