//! Grubhub order-history connector.
//!
//! Lists past orders through the diner search endpoint:
//!
//! ```text
//! GET {base}/diners/{diner_uuid}/search_listing
//!     ?pageNum=N&pageSize=S&facet=scheduled%3Afalse&facet=orderType%3AALL&sorts=default
//! Authorization: Bearer {access_token}
//! ```
//!
//! The response is `{ "results": [...], "pager": { "current_page", "total_pages" } }`.
//! Orders are identified by their `id` field. Grubhub has no per-order
//! detail lookup; the listing already carries charges and line items.

use async_trait::async_trait;
use serde_json::Value;

use order_sync_core::models::{AuthSignal, Site};
use order_sync_core::pagination::{Page, PageCursor, Pager};

use crate::error::{json_body, FetchError};
use crate::traits::{id_field, OrderSource};

pub const DEFAULT_BASE_URL: &str = "https://api-gtm.grubhub.com";

pub struct GrubhubSource {
    client: reqwest::Client,
    base_url: String,
}

impl GrubhubSource {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Builds the listing URL for one page.
pub fn listing_url(base_url: &str, diner_id: &str, page_number: u32, page_size: u32) -> String {
    format!(
        "{}/diners/{}/search_listing?pageNum={}&pageSize={}&facet=scheduled%3Afalse&facet=orderType%3AALL&sorts=default",
        base_url, diner_id, page_number, page_size
    )
}

/// Splits a listing response into records and pager.
pub fn parse_listing(body: Value) -> Result<Page, FetchError> {
    let Value::Object(mut body) = body else {
        return Err(FetchError::Malformed(
            "listing response is not an object".into(),
        ));
    };

    let records = match body.remove("results") {
        Some(Value::Array(results)) => results,
        Some(Value::Null) | None => {
            return Err(FetchError::Malformed(format!(
                "listing response has no results: {}",
                snippet(&body)
            )))
        }
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "results is not an array: {}",
                other
            )))
        }
    };

    let pager = match body.remove("pager") {
        Some(Value::Null) | None => {
            return Err(FetchError::Malformed("listing response has no pager".into()))
        }
        Some(raw) => serde_json::from_value::<Pager>(raw)
            .map_err(|e| FetchError::Malformed(format!("bad pager: {}", e)))?,
    };

    Ok(Page {
        records,
        pager: Some(pager),
    })
}

fn snippet(body: &serde_json::Map<String, Value>) -> String {
    Value::Object(body.clone()).to_string().chars().take(200).collect()
}

#[async_trait]
impl OrderSource for GrubhubSource {
    fn site(&self) -> Site {
        Site::Grubhub
    }

    fn record_id(&self, raw: &Value) -> Option<String> {
        id_field(raw, "id")
    }

    async fn fetch_page(&self, auth: &AuthSignal, cursor: &PageCursor) -> Result<Page, FetchError> {
        let PageCursor::Page {
            page_number,
            page_size,
            ..
        } = *cursor
        else {
            return Err(FetchError::Malformed(
                "grubhub pages by page number".into(),
            ));
        };
        let diner_id = auth
            .account_id
            .as_deref()
            .ok_or_else(|| FetchError::Malformed("no diner id in auth signal".into()))?;

        let url = listing_url(&self.base_url, diner_id, page_number, page_size);
        tracing::debug!(page = page_number, size = page_size, "requesting grubhub orders");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&auth.token)
            .header("accept", "application/json")
            .header("origin", "https://www.grubhub.com")
            .header("referer", "https://www.grubhub.com/")
            .send()
            .await?;

        parse_listing(json_body(resp).await?)
    }
}
