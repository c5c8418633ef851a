//! Extension traits for the site-facing edges of the engine.
//!
//! The sync engine talks to the outside world through two seams:
//!
//! ```text
//! ┌──────────────┐      ┌──────────────────┐      ┌──────────────┐
//! │  AuthProbe   │─────▶│  SessionMonitor  │      │ OrderSource  │
//! │ (login state)│      │ FetchCoordinator │─────▶│ (one site's  │
//! └──────────────┘      └──────────────────┘      │  order API)  │
//!                                                  └──────────────┘
//! ```
//!
//! Built-in implementations cover Grubhub and DoorDash
//! ([`crate::connector_grubhub`], [`crate::connector_doordash`]) and a
//! credentials-file probe ([`crate::auth`]). Tests swap in scripted fakes.

use async_trait::async_trait;
use serde_json::Value;

use order_sync_core::models::{AuthSignal, Site};
use order_sync_core::pagination::{Page, PageCursor};

use crate::error::FetchError;

// ═══════════════════════════════════════════════════════════════════════
// OrderSource Trait
// ═══════════════════════════════════════════════════════════════════════

/// One platform's order-history API.
///
/// # Contract
///
/// * [`fetch_page`](OrderSource::fetch_page) makes exactly one remote call
///   and returns the raw records at `cursor`. Transport failures and
///   unexpected shapes are errors; an empty page is not.
/// * [`record_id`](OrderSource::record_id) extracts the stable identifier
///   used for dedup. A record without one is malformed.
/// * Sites that attach a detail sub-resource return `true` from
///   [`has_details`](OrderSource::has_details) and implement
///   [`fetch_detail`](OrderSource::fetch_detail).
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// The site this source talks to.
    fn site(&self) -> Site;

    /// Identifier of a raw record.
    fn record_id(&self, raw: &Value) -> Option<String>;

    /// Fetch the page at `cursor`.
    async fn fetch_page(&self, auth: &AuthSignal, cursor: &PageCursor) -> Result<Page, FetchError>;

    /// Whether each new order needs a follow-up detail lookup.
    fn has_details(&self) -> bool {
        false
    }

    /// Fetch the detail sub-resource of order `id`.
    async fn fetch_detail(&self, _auth: &AuthSignal, id: &str) -> Result<Value, FetchError> {
        Err(FetchError::Malformed(format!(
            "{} has no detail lookup (order {})",
            self.site(),
            id
        )))
    }
}

/// Reads `field` of a record as an id, accepting strings and numbers.
pub fn id_field(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// AuthProbe Trait
// ═══════════════════════════════════════════════════════════════════════

/// Samples the authentication signal of one site.
///
/// Returning `None` means "logged out". Probes never fail: a missing or
/// unreadable credential source is a normal logged-out state and should at
/// most be logged.
#[async_trait]
pub trait AuthProbe: Send + Sync {
    async fn sample(&self) -> Option<AuthSignal>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_field_accepts_strings_and_numbers() {
        assert_eq!(id_field(&json!({ "id": "abc" }), "id"), Some("abc".into()));
        assert_eq!(id_field(&json!({ "id": 42 }), "id"), Some("42".into()));
        assert_eq!(id_field(&json!({ "id": "" }), "id"), None);
        assert_eq!(id_field(&json!({ "id": null }), "id"), None);
        assert_eq!(id_field(&json!({}), "id"), None);
    }
}
