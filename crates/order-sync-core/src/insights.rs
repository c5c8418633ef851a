//! Normalization of stored platform payloads into canonical order records.
//!
//! Each site returns its own JSON schema. [`RawOrder`] is the tagged union
//! of the two, and [`normalize`] is the single mapping into
//! [`OrderRecord`]. The mapping is total: every field the platforms may
//! omit (or send as `null`) has a default, and a payload that does not
//! decode at all degrades to an all-defaults record rather than an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Site, StoredOrder};

const UNKNOWN_RESTAURANT: &str = "Unknown";
const UNKNOWN_STATE: &str = "UNKNOWN";

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============ Grubhub ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubRaw {
    pub time_placed: Option<String>,
    pub state: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub charges: GrubhubCharges,
    #[serde(deserialize_with = "null_default")]
    pub payments: GrubhubPayments,
    #[serde(deserialize_with = "null_default")]
    pub restaurants: Vec<Named>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubCharges {
    #[serde(deserialize_with = "null_default")]
    pub diner_grand_total: f64,
    #[serde(deserialize_with = "null_default")]
    pub diner_subtotal: f64,
    #[serde(deserialize_with = "null_default")]
    pub fees: GrubhubFees,
    #[serde(deserialize_with = "null_default")]
    pub taxes: Totalled,
    #[serde(deserialize_with = "null_default")]
    pub tip: GrubhubTip,
    #[serde(deserialize_with = "null_default")]
    pub donations: Totalled,
    #[serde(deserialize_with = "null_default")]
    pub lines: GrubhubLines,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubFees {
    #[serde(deserialize_with = "null_default")]
    pub service: f64,
    #[serde(deserialize_with = "null_default")]
    pub delivery: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Totalled {
    #[serde(deserialize_with = "null_default")]
    pub total: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubTip {
    #[serde(deserialize_with = "null_default")]
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubLines {
    #[serde(deserialize_with = "null_default")]
    pub line_items: Vec<GrubhubLineItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubLineItem {
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "null_default")]
    pub diner_total: f64,
    #[serde(deserialize_with = "null_default")]
    pub options: Vec<PricedOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubPayments {
    #[serde(deserialize_with = "null_default")]
    pub payments: Vec<GrubhubPayment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrubhubPayment {
    #[serde(rename = "type", deserialize_with = "null_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_default")]
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Named {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PricedOption {
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    #[serde(deserialize_with = "null_default")]
    pub price: f64,
    pub quantity: Option<f64>,
}

// ============ DoorDash ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoorDashRaw {
    pub created_at: Option<String>,
    pub cancelled_at: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub grand_total: Money,
    #[serde(deserialize_with = "null_default")]
    pub orders: Vec<DoorDashSubOrder>,
    #[serde(deserialize_with = "null_default")]
    pub store: Named,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Money {
    #[serde(deserialize_with = "null_default")]
    pub unit_amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DoorDashSubOrder {
    #[serde(deserialize_with = "null_default")]
    pub items: Vec<DoorDashItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoorDashItem {
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "null_default")]
    pub original_item_price: f64,
    #[serde(deserialize_with = "null_default")]
    pub order_item_extras: Vec<DoorDashExtra>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoorDashExtra {
    #[serde(deserialize_with = "null_default")]
    pub order_item_extra_options: Vec<PricedOption>,
}

/// Receipt sub-resource attached by the detail lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoorDashReceipt {
    #[serde(deserialize_with = "null_default")]
    pub line_items: Vec<ReceiptLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiptLine {
    pub charge_id: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub final_money: Money,
}

impl DoorDashReceipt {
    fn amount(&self, charge_id: &str) -> f64 {
        self.line_items
            .iter()
            .find(|line| line.charge_id.as_deref() == Some(charge_id))
            .map(|line| line.final_money.unit_amount)
            .unwrap_or_default()
    }
}

// ============ Canonical record ============

/// Raw payload of one order, tagged by the platform it came from.
#[derive(Debug, Clone)]
pub enum RawOrder {
    Grubhub(GrubhubRaw),
    DoorDash(DoorDashRaw, DoorDashReceipt),
}

impl RawOrder {
    /// Decodes a stored order of `site`. Undecodable payloads become the
    /// all-defaults shape.
    pub fn from_stored(site: Site, stored: &StoredOrder) -> Self {
        match site {
            Site::Grubhub => {
                RawOrder::Grubhub(serde_json::from_value(stored.raw.clone()).unwrap_or_default())
            }
            Site::DoorDash => {
                let raw = serde_json::from_value(stored.raw.clone()).unwrap_or_default();
                let receipt = stored
                    .detail
                    .clone()
                    .and_then(|detail| serde_json::from_value(detail).ok())
                    .unwrap_or_default();
                RawOrder::DoorDash(raw, receipt)
            }
        }
    }
}

/// Money amounts of one order, in the platform's minor units.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonetaryBreakdown {
    pub grand_total: f64,
    pub subtotal: f64,
    pub service_fee: f64,
    pub delivery_fee: f64,
    pub sales_tax: f64,
    pub driver_tip: f64,
    pub donation: f64,
    pub gift_card_credit: f64,
    pub promotional_discount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItemOption {
    pub name: String,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub quantity: f64,
    pub original_item_price: f64,
    pub options: Vec<LineItemOption>,
}

/// Canonical order used by the read path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub date: Option<DateTime<Utc>>,
    pub state: String,
    pub monetary: MonetaryBreakdown,
    pub line_items: Vec<LineItem>,
    pub restaurant_name: String,
    pub fetched_at: DateTime<Utc>,
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn restaurant_name(name: Option<&String>) -> String {
    name.filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_RESTAURANT.to_string())
}

fn option_from(opt: &PricedOption) -> LineItemOption {
    LineItemOption {
        name: opt.name.clone(),
        price: opt.price,
        quantity: opt.quantity.unwrap_or(1.0),
    }
}

/// Maps a stored order of `site` to its canonical record.
pub fn normalize(site: Site, stored: &StoredOrder) -> OrderRecord {
    let (date, state, monetary, line_items, restaurant) =
        match RawOrder::from_stored(site, stored) {
            RawOrder::Grubhub(raw) => {
                let payment_total = |kind: &str| -> f64 {
                    raw.payments
                        .payments
                        .iter()
                        .filter(|p| p.kind == kind)
                        .map(|p| p.amount)
                        .sum()
                };
                let charges = &raw.charges;
                let monetary = MonetaryBreakdown {
                    grand_total: charges.diner_grand_total,
                    subtotal: charges.diner_subtotal,
                    service_fee: charges.fees.service,
                    delivery_fee: charges.fees.delivery,
                    sales_tax: charges.taxes.total,
                    driver_tip: charges.tip.amount,
                    donation: charges.donations.total,
                    gift_card_credit: payment_total("GIFT_CARD"),
                    promotional_discount: payment_total("PROMO_CODE"),
                };
                let items = charges
                    .lines
                    .line_items
                    .iter()
                    .map(|item| LineItem {
                        name: item.name.clone(),
                        quantity: item.quantity.unwrap_or(1.0),
                        original_item_price: item.diner_total,
                        options: item.options.iter().map(option_from).collect(),
                    })
                    .collect();
                (
                    parse_date(raw.time_placed.as_deref()),
                    raw.state
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_STATE.to_string()),
                    monetary,
                    items,
                    restaurant_name(raw.restaurants.first().and_then(|r| r.name.as_ref())),
                )
            }
            RawOrder::DoorDash(raw, receipt) => {
                let state = if raw.cancelled_at.as_deref().is_some_and(|c| !c.is_empty()) {
                    "CANCELLED"
                } else {
                    "COMPLETED"
                };
                let monetary = MonetaryBreakdown {
                    grand_total: raw.grand_total.unit_amount,
                    subtotal: receipt.amount("SUBTOTAL"),
                    service_fee: receipt.amount("SERVICE_FEE"),
                    delivery_fee: receipt.amount("DELIVERY_FEE"),
                    sales_tax: receipt.amount("TAX"),
                    driver_tip: receipt.amount("TIP"),
                    donation: 0.0,
                    gift_card_credit: receipt.amount("CREDITS"),
                    promotional_discount: receipt.amount("PROMOTION_DISCOUNT"),
                };
                let items = raw
                    .orders
                    .iter()
                    .flat_map(|order| order.items.iter())
                    .map(|item| LineItem {
                        name: item.name.clone(),
                        quantity: item.quantity.unwrap_or(1.0),
                        original_item_price: item.original_item_price,
                        options: item
                            .order_item_extras
                            .iter()
                            .flat_map(|extra| extra.order_item_extra_options.iter())
                            .map(option_from)
                            .collect(),
                    })
                    .collect();
                (
                    parse_date(raw.created_at.as_deref()),
                    state.to_string(),
                    monetary,
                    items,
                    restaurant_name(raw.store.name.as_ref()),
                )
            }
        };

    OrderRecord {
        id: stored.id.clone(),
        date,
        state,
        monetary,
        line_items,
        restaurant_name: restaurant,
        fetched_at: stored.fetched_at,
    }
}

/// Normalizes a whole collection, preserving its order.
pub fn normalize_all(site: Site, orders: &[StoredOrder]) -> Vec<OrderRecord> {
    orders.iter().map(|order| normalize(site, order)).collect()
}
