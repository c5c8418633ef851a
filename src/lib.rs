//! # order-sync
//!
//! Incrementally mirrors a user's Grubhub and DoorDash order history into a
//! local store for later analysis.
//!
//! Neither platform offers an export. Orders are read page by page from the
//! endpoints the platforms' own web apps use, with the credentials of a
//! logged-in browser session.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────────┐        ┌───────────────────────┐
//!  │ scraper (one per site)   │        │ background            │
//!  │  SessionMonitor          │  bus   │  StorageMergeService  │
//!  │  FetchCoordinator ───────┼───────▶│  host routing         │
//!  │  PaginatedFetcher        │        └──────────┬────────────┘
//!  └────────────┬─────────────┘                   │
//!               │         ┌───────────────────────▼──────┐
//!               └────────▶│ KvStore (SQLite, observable) │◀── viewer
//!                         └──────────────────────────────┘
//! ```
//!
//! Contexts share nothing but the store and the message bus. Every store
//! write is broadcast, which is how a viewer learns that a cycle started or
//! finished.
//!
//! ## Quick Start
//!
//! ```bash
//! osync init                 # create database
//! osync sync grubhub         # one fetch cycle
//! osync insights --site grubhub
//! osync run                  # all contexts + HTTP bridge
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`traits`] | `OrderSource` and `AuthProbe` extension traits |
//! | [`auth`] | Credentials-file login probe |
//! | [`connector_grubhub`] | Grubhub order listing |
//! | [`connector_doordash`] | DoorDash order listing and receipts |
//! | [`fetcher`] | Incremental, deduplicating pagination |
//! | [`coordinator`] | Single-flight fetch guard and cycle driver |
//! | [`session`] | Login and account-switch detection |
//! | [`merge`] | Merging batches into the order collections |
//! | [`bus`] | Request/response messaging between contexts |
//! | [`background`] | Background context |
//! | [`scraper`] | Per-site scraper context |
//! | [`viewer`] | Read path and store-change events |
//! | [`runtime`] | Context wiring |
//! | [`server`] | HTTP bridge onto the bus |
//! | [`sqlite_store`] | SQLite `KvStore` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod auth;
pub mod background;
pub mod bus;
pub mod config;
pub mod connector_doordash;
pub mod connector_grubhub;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod merge;
pub mod migrate;
pub mod runtime;
pub mod scraper;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod status;
pub mod sync_cmd;
pub mod traits;
pub mod viewer;
