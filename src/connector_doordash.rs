//! DoorDash order-history connector.
//!
//! DoorDash is queried through its consumer GraphQL gateway, authenticated
//! by replaying the browser's cookies plus the CSRF token:
//!
//! | Operation | Variables | Payload |
//! |-----------|-----------|---------|
//! | `getConsumerOrdersWithDetails` | `offset`, `limit`, `includeCancelled` | `data.getConsumerOrdersWithDetails[]` |
//! | `getConsumerOrderReceipt` | `orderCartId` | `data.getConsumerOrderReceipt` |
//!
//! The listing reports no pager, so pagination is offset based and ends on
//! a short or empty page. Orders are identified by `orderUuid`, falling back
//! to `id`. Each new order gets a receipt lookup, which is where the fee and
//! tax breakdown lives.

use async_trait::async_trait;
use serde_json::{json, Value};

use order_sync_core::models::{AuthSignal, Site};
use order_sync_core::pagination::{Page, PageCursor};

use crate::error::{json_body, FetchError};
use crate::traits::{id_field, OrderSource};

pub const DEFAULT_BASE_URL: &str = "https://www.doordash.com";

const ORDERS_OPERATION: &str = "getConsumerOrdersWithDetails";
const RECEIPT_OPERATION: &str = "getConsumerOrderReceipt";

const ORDERS_QUERY: &str = r#"query getConsumerOrdersWithDetails($offset: Int!, $limit: Int!, $includeCancelled: Boolean) {
  getConsumerOrdersWithDetails(offset: $offset, limit: $limit, includeCancelled: $includeCancelled) {
    id
    orderUuid
    deliveryUuid
    createdAt
    submittedAt
    cancelledAt
    fulfilledAt
    isGroup
    isPickup
    fulfillmentType
    orders {
      id
      items {
        id
        name
        quantity
        originalItemPrice
        orderItemExtras {
          menuItemExtraId
          name
          orderItemExtraOptions {
            menuExtraOptionId
            name
            description
            price
            quantity
          }
        }
      }
    }
    grandTotal {
      unitAmount
      currency
      decimalPlaces
      displayString
    }
    store {
      id
      name
      business {
        id
        name
      }
    }
  }
}"#;

const RECEIPT_QUERY: &str = r#"query getConsumerOrderReceipt($orderCartId: ID!) {
  getConsumerOrderReceipt(orderCartId: $orderCartId) {
    lineItems {
      label
      chargeId
      finalMoney {
        unitAmount
        displayString
      }
      originalMoney {
        unitAmount
        displayString
      }
      note
    }
    storeName
  }
}"#;

pub struct DoorDashSource {
    client: reqwest::Client,
    base_url: String,
}

impl DoorDashSource {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn graphql(&self, auth: &AuthSignal, operation: &str, body: Value) -> Result<Value, FetchError> {
        let url = format!("{}/graphql/{}?operation={}", self.base_url, operation, operation);

        let mut req = self
            .client
            .post(&url)
            .header("accept", "*/*")
            .header("apollographql-client-name", "@doordash/app-consumer-production-ssr-client")
            .header("apollographql-client-version", "3.0")
            .header("x-channel-id", "marketplace")
            .header("x-experience-id", "doordash")
            .header("referer", "https://www.doordash.com/orders/")
            .json(&body);
        if let Some(cookie) = &auth.cookie_header {
            req = req.header("cookie", cookie);
        }
        if let Some(csrf) = &auth.csrf_token {
            req = req.header("x-csrftoken", csrf);
        }

        let resp = req.send().await?;
        json_body(resp).await
    }
}

/// Request body of one listing page.
pub fn orders_request(offset: u32, limit: u32) -> Value {
    json!({
        "operationName": ORDERS_OPERATION,
        "variables": { "offset": offset, "limit": limit, "includeCancelled": true },
        "query": ORDERS_QUERY,
    })
}

/// Request body of one receipt lookup.
pub fn receipt_request(order_cart_id: &str) -> Value {
    json!({
        "operationName": RECEIPT_OPERATION,
        "variables": { "orderCartId": order_cart_id },
        "query": RECEIPT_QUERY,
    })
}

/// Pulls `data.<operation>` out of a GraphQL response.
///
/// A response carrying `errors` and no data is malformed; DoorDash
/// answers expired sessions that way with a 200 status.
pub fn extract_data(mut body: Value, operation: &str) -> Result<Value, FetchError> {
    let data = body
        .get_mut("data")
        .and_then(|d| d.get_mut(operation))
        .map(Value::take);

    match data {
        Some(Value::Null) | None => {
            let reason = body
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no data in response");
            Err(FetchError::Malformed(format!("{}: {}", operation, reason)))
        }
        Some(data) => Ok(data),
    }
}

/// Splits a listing response into its records.
pub fn parse_orders(body: Value) -> Result<Page, FetchError> {
    match extract_data(body, ORDERS_OPERATION)? {
        Value::Array(records) => Ok(Page {
            records,
            pager: None,
        }),
        other => Err(FetchError::Malformed(format!(
            "{} is not a list: {}",
            ORDERS_OPERATION, other
        ))),
    }
}

#[async_trait]
impl OrderSource for DoorDashSource {
    fn site(&self) -> Site {
        Site::DoorDash
    }

    fn record_id(&self, raw: &Value) -> Option<String> {
        id_field(raw, "orderUuid").or_else(|| id_field(raw, "id"))
    }

    async fn fetch_page(&self, auth: &AuthSignal, cursor: &PageCursor) -> Result<Page, FetchError> {
        let PageCursor::Offset { offset, limit } = *cursor else {
            return Err(FetchError::Malformed("doordash pages by offset".into()));
        };
        tracing::debug!(offset, limit, "requesting doordash orders");

        let body = self
            .graphql(auth, ORDERS_OPERATION, orders_request(offset, limit))
            .await?;
        parse_orders(body)
    }

    fn has_details(&self) -> bool {
        true
    }

    async fn fetch_detail(&self, auth: &AuthSignal, id: &str) -> Result<Value, FetchError> {
        let body = self
            .graphql(auth, RECEIPT_OPERATION, receipt_request(id))
            .await?;
        extract_data(body, RECEIPT_OPERATION)
    }
}
