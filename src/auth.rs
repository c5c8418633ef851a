//! Login detection from an exported browser session.
//!
//! The platforms authenticate through state the browser holds: cookies and
//! local storage. A credentials file is a JSON export of that state for one
//! site:
//!
//! ```json
//! {
//!   "cookies": { "ngStorage-oauthTokens": "{\"access_token\":\"…\"}" },
//!   "local_storage": { "ngStorage-account": "{\"ud_id\":\"…\"}" },
//!   "login_at": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! Values are stored decoded. The file is re-read on every sample, so
//! replacing it (logging in as someone else) is picked up by the next
//! session check.
//!
//! | Site | Logged in when | Token |
//! |------|----------------|-------|
//! | Grubhub | auth cookie holds `access_token` and local storage holds `ud_id` | bearer token |
//! | DoorDash | auth cookie is present | auth cookie value |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use order_sync_core::models::{AuthSignal, Site};

use crate::traits::AuthProbe;

const GRUBHUB_AUTH_COOKIE: &str = "ngStorage-oauthTokens";
const GRUBHUB_ACCOUNT_KEY: &str = "ngStorage-account";
const DOORDASH_AUTH_COOKIE: &str = "dd_session_id";
const DOORDASH_CSRF_COOKIE: &str = "csrf_token";

/// Exported browser state for one site.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BrowserExport {
    pub cookies: BTreeMap<String, String>,
    pub local_storage: BTreeMap<String, String>,
    pub login_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct OauthTokens {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct GrubhubAccount {
    ud_id: Option<String>,
}

/// Default name of the cookie that marks a logged-in session.
pub fn default_auth_cookie(site: Site) -> &'static str {
    match site {
        Site::Grubhub => GRUBHUB_AUTH_COOKIE,
        Site::DoorDash => DOORDASH_AUTH_COOKIE,
    }
}

/// Extracts the auth signal of `site` from an export, or `None` when the
/// export does not describe a logged-in session.
pub fn signal_from_export(site: Site, export: &BrowserExport, auth_cookie: &str) -> Option<AuthSignal> {
    let cookie = export.cookies.get(auth_cookie).filter(|v| !v.is_empty())?;

    match site {
        Site::Grubhub => {
            let tokens: OauthTokens = serde_json::from_str(cookie).ok()?;
            let token = tokens.access_token.filter(|t| !t.is_empty())?;
            let account: GrubhubAccount =
                serde_json::from_str(export.local_storage.get(GRUBHUB_ACCOUNT_KEY)?).ok()?;
            let account_id = account.ud_id.filter(|id| !id.is_empty())?;
            Some(AuthSignal {
                token,
                account_id: Some(account_id),
                login_at: export.login_at,
                cookie_header: None,
                csrf_token: None,
            })
        }
        Site::DoorDash => {
            let cookie_header = export
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            Some(AuthSignal {
                token: cookie.clone(),
                account_id: None,
                login_at: export.login_at,
                cookie_header: Some(cookie_header),
                csrf_token: export.cookies.get(DOORDASH_CSRF_COOKIE).cloned(),
            })
        }
    }
}

/// [`AuthProbe`] backed by a credentials file on disk.
pub struct CredentialsFileProbe {
    site: Site,
    path: PathBuf,
    auth_cookie: String,
}

impl CredentialsFileProbe {
    pub fn new(site: Site, path: PathBuf, auth_cookie: Option<String>) -> Self {
        Self {
            site,
            path,
            auth_cookie: auth_cookie.unwrap_or_else(|| default_auth_cookie(site).to_string()),
        }
    }
}

#[async_trait]
impl AuthProbe for CredentialsFileProbe {
    async fn sample(&self) -> Option<AuthSignal> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(site = %self.site, path = %self.path.display(), "no credentials file");
                return None;
            }
            Err(e) => {
                tracing::warn!(site = %self.site, path = %self.path.display(), error = %e, "cannot read credentials file");
                return None;
            }
        };

        let export: BrowserExport = match serde_json::from_str(&content) {
            Ok(export) => export,
            Err(e) => {
                tracing::warn!(site = %self.site, path = %self.path.display(), error = %e, "credentials file is not a browser export");
                return None;
            }
        };

        signal_from_export(self.site, &export, &self.auth_cookie)
    }
}

/// [`AuthProbe`] whose answer is set programmatically.
#[derive(Default)]
pub struct StaticAuth {
    signal: RwLock<Option<AuthSignal>>,
}

impl StaticAuth {
    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn logged_in(signal: AuthSignal) -> Self {
        Self {
            signal: RwLock::new(Some(signal)),
        }
    }

    pub async fn set(&self, signal: Option<AuthSignal>) {
        *self.signal.write().await = signal;
    }
}

#[async_trait]
impl AuthProbe for StaticAuth {
    async fn sample(&self) -> Option<AuthSignal> {
        self.signal.read().await.clone()
    }
}
