use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use order_sync_core::models::Site;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sites: SitesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Page size of the first backfill, when a site has no stored orders.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Page size of later cycles; new orders show up at the front.
    #[serde(default = "default_incremental_page_size")]
    pub incremental_page_size: u32,
    /// Age after which an `InProgress` guard is treated as abandoned. A
    /// running cycle renews it after every request, so it must exceed
    /// `http.timeout_secs`.
    #[serde(default = "default_fetch_lease_secs")]
    pub fetch_lease_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            incremental_page_size: default_incremental_page_size(),
            fetch_lease_secs: default_fetch_lease_secs(),
        }
    }
}

fn default_page_size() -> u32 {
    10
}
fn default_incremental_page_size() -> u32 {
    2
}
fn default_fetch_lease_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_attempts() -> u32 {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("order-sync/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SitesConfig {
    pub grubhub: Option<SiteConfig>,
    pub doordash: Option<SiteConfig>,
}

impl SitesConfig {
    pub fn get(&self, site: Site) -> Option<&SiteConfig> {
        match site {
            Site::Grubhub => self.grubhub.as_ref(),
            Site::DoorDash => self.doordash.as_ref(),
        }
    }

    /// Sites that have a `[sites.<name>]` table, in a fixed order.
    pub fn configured(&self) -> Vec<Site> {
        Site::ALL
            .into_iter()
            .filter(|site| self.get(*site).is_some())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// JSON export of the browser session (cookies + local storage).
    pub credentials: PathBuf,
    /// Override of the platform API origin, mainly for testing.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Cookie that carries the login; its presence means "logged in".
    #[serde(default)]
    pub auth_cookie: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.default_page_size == 0 {
        anyhow::bail!("sync.default_page_size must be > 0");
    }
    if config.sync.incremental_page_size == 0 {
        anyhow::bail!("sync.incremental_page_size must be > 0");
    }
    if config.sync.fetch_lease_secs == 0 {
        anyhow::bail!("sync.fetch_lease_secs must be > 0");
    }
    if config.sync.fetch_lease_secs <= config.http.timeout_secs {
        anyhow::bail!(
            "sync.fetch_lease_secs ({}) must exceed http.timeout_secs ({})",
            config.sync.fetch_lease_secs,
            config.http.timeout_secs
        );
    }
    if config.session.max_poll_attempts == 0 {
        anyhow::bail!("session.max_poll_attempts must be >= 1");
    }
    if config.bus.request_timeout_secs == 0 {
        anyhow::bail!("bus.request_timeout_secs must be > 0");
    }

    for site in config.sites.configured() {
        if let Some(base_url) = config.sites.get(site).and_then(|s| s.base_url.as_deref()) {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                anyhow::bail!(
                    "sites.{}.base_url must start with http:// or https:// (got '{}')",
                    site,
                    base_url
                );
            }
        }
    }

    Ok(())
}
