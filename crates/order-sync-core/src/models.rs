//! Core data models shared by every execution context.
//!
//! These types are what crosses context boundaries: they are persisted in
//! the shared store and carried in bus messages, so all of them are serde
//! types with stable field names.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One of the two supported ordering platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Grubhub,
    DoorDash,
}

impl Site {
    pub const ALL: [Site; 2] = [Site::Grubhub, Site::DoorDash];

    /// Lowercase name used as the prefix of every per-site store key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Grubhub => "grubhub",
            Site::DoorDash => "doordash",
        }
    }

    /// Maps a browser host (e.g. `www.grubhub.com`) to the site it belongs to.
    pub fn from_host(host: &str) -> Option<Site> {
        let host = host.to_ascii_lowercase();
        if host.contains("grubhub.com") {
            Some(Site::Grubhub)
        } else if host.contains("doordash.com") {
            Some(Site::DoorDash)
        } else {
            None
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Site {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grubhub" => Ok(Site::Grubhub),
            "doordash" => Ok(Site::DoorDash),
            other => anyhow::bail!("Unknown site: '{}'. Available: grubhub, doordash", other),
        }
    }
}

/// Authentication material observed for a site.
///
/// Produced by an auth probe; absence of a signal means "logged out".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSignal {
    /// Bearer token (Grubhub) or session cookie value (DoorDash).
    pub token: String,
    /// Platform account identifier, when the site needs one in its URLs.
    pub account_id: Option<String>,
    /// When the platform recorded the login, if known.
    pub login_at: Option<DateTime<Utc>>,
    /// Full `cookie` header to replay, for sites that authenticate by cookie.
    pub cookie_header: Option<String>,
    /// CSRF token to echo back in request headers.
    pub csrf_token: Option<String>,
}

/// Derives the session identity for `signal` on `site`.
///
/// The id is a SHA-256 digest, so the raw token never reaches the store.
/// Two signals with the same token and login time map to the same id; any
/// change of either is treated as an account switch.
pub fn derive_session_id(site: Site, signal: &AuthSignal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(signal.token.as_bytes());
    if let Some(login_at) = signal.login_at {
        hasher.update([0u8]);
        hasher.update(login_at.timestamp().to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Login state of one site as last observed by its session monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub site: Site,
    pub session_id: Option<String>,
    pub is_logged_in: bool,
}

/// Single-flight guard state of one site, persisted under `<site>Fetching`.
///
/// `InProgress` carries a lease: the holder id lets a cycle release only
/// the guard it acquired, and `acquired_at` lets a later trigger take over a
/// guard abandoned by a crashed context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    Idle,
    InProgress {
        holder: Uuid,
        acquired_at: DateTime<Utc>,
    },
}

impl FetchState {
    pub fn in_progress(now: DateTime<Utc>) -> Self {
        FetchState::InProgress {
            holder: Uuid::new_v4(),
            acquired_at: now,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, FetchState::InProgress { .. })
    }

    /// True when a cycle holds the guard and its lease has not run out.
    pub fn is_held(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self {
            FetchState::Idle => false,
            FetchState::InProgress { acquired_at, .. } => now - *acquired_at < lease,
        }
    }
}

/// A single order as persisted in a site's collection.
///
/// `raw` is the platform payload exactly as returned by the listing call.
/// `detail` is the per-order receipt for sites that have one, absent when
/// the lookup failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOrder {
    pub id: String,
    pub fetched_at: DateTime<Utc>,
    pub raw: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Outcome flag published at the end of every fetch cycle (`dataStored`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStored {
    pub site: Site,
    pub ok: bool,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(token: &str) -> AuthSignal {
        AuthSignal {
            token: token.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn site_from_host() {
        assert_eq!(Site::from_host("www.grubhub.com"), Some(Site::Grubhub));
        assert_eq!(Site::from_host("WWW.DOORDASH.COM"), Some(Site::DoorDash));
        assert_eq!(Site::from_host("example.com"), None);
    }

    #[test]
    fn site_parse_and_display_agree() {
        for site in Site::ALL {
            assert_eq!(site.to_string().parse::<Site>().unwrap(), site);
        }
        assert!("ubereats".parse::<Site>().is_err());
    }

    #[test]
    fn session_id_is_stable_and_hides_token() {
        let a = derive_session_id(Site::Grubhub, &signal("tok-1"));
        let b = derive_session_id(Site::Grubhub, &signal("tok-1"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("tok-1"));
    }

    #[test]
    fn session_id_changes_with_token_site_or_login_time() {
        let base = derive_session_id(Site::Grubhub, &signal("tok-1"));
        assert_ne!(base, derive_session_id(Site::Grubhub, &signal("tok-2")));
        assert_ne!(base, derive_session_id(Site::DoorDash, &signal("tok-1")));

        let mut later = signal("tok-1");
        later.login_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        assert_ne!(base, derive_session_id(Site::Grubhub, &later));
    }

    #[test]
    fn fetch_state_lease_expiry() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let state = FetchState::in_progress(start);
        let lease = Duration::seconds(300);

        assert!(state.is_held(start + Duration::seconds(299), lease));
        assert!(!state.is_held(start + Duration::seconds(300), lease));
        assert!(!FetchState::Idle.is_held(start, lease));
    }

    #[test]
    fn fetch_state_serde_shape() {
        let idle = serde_json::to_value(FetchState::Idle).unwrap();
        assert_eq!(idle, serde_json::json!({ "state": "idle" }));

        let held = FetchState::in_progress(Utc::now());
        let round: FetchState =
            serde_json::from_value(serde_json::to_value(&held).unwrap()).unwrap();
        assert_eq!(round, held);
    }
}
