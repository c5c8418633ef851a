//! # order-sync core
//!
//! Shared logic for order-sync that does not touch the network or the
//! filesystem: site and session models, the pagination stop rules, the
//! observable key-value store abstraction, and the normalization of raw
//! platform payloads into canonical order records.
//!
//! This crate has no sqlx or reqwest dependency. The only runtime piece it
//! pulls in is `tokio::sync` for store change broadcasts.

pub mod insights;
pub mod models;
pub mod pagination;
pub mod store;
