//! # order-sync CLI (`osync`)
//!
//! Mirrors Grubhub and DoorDash order history into a local SQLite store.
//!
//! ## Usage
//!
//! ```bash
//! osync --config ./config/osync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osync init` | Create the SQLite database and schema |
//! | `osync status` | Login, fetch and order-count summary per site |
//! | `osync sync <site>` | Check the session and run one fetch cycle |
//! | `osync insights [--site <site>]` | Print normalized orders as JSON lines |
//! | `osync watch` | Run the scrapers and print store events |
//! | `osync run` | Run every context and the HTTP message bridge |
//!
//! ## Examples
//!
//! ```bash
//! osync init --config ./config/osync.toml
//! osync sync grubhub --config ./config/osync.toml
//! osync insights --site doordash --config ./config/osync.toml | jq .monetary
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use order_sync::{config, logging, migrate, status, sync_cmd};
use order_sync_core::models::Site;

/// order-sync: incremental order-history mirror for Grubhub and DoorDash.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "osync",
    about = "order-sync: incremental order-history mirror for Grubhub and DoorDash",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osync.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Show login state, running cycles and stored order counts.
    Status,

    /// Check the session of one site and run a fetch cycle.
    ///
    /// A first login or an account switch resets the stored orders before
    /// the cycle backfills them.
    Sync {
        /// Site to sync (`grubhub` or `doordash`).
        site: Site,
    },

    /// Print normalized orders as JSON lines.
    Insights {
        /// Site to print; defaults to the site of the last `setHost`.
        #[arg(long)]
        site: Option<Site>,
    },

    /// Run the scrapers and print store events until interrupted.
    Watch,

    /// Run every context and serve the HTTP message bridge.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Sync { site } => {
            sync_cmd::run_sync(&cfg, site).await?;
        }
        Commands::Insights { site } => {
            sync_cmd::run_insights(&cfg, site).await?;
        }
        Commands::Watch => {
            sync_cmd::run_watch(&cfg).await?;
        }
        Commands::Run => {
            sync_cmd::run_service(&cfg).await?;
        }
    }

    Ok(())
}
