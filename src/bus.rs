//! Request/response messaging between execution contexts.
//!
//! Contexts share no memory. They talk by sending a [`Request`] to a named
//! [`Endpoint`] and awaiting exactly one [`Response`]. Each registered
//! endpoint is served by a listener task that hands every incoming request
//! to its own task, so a handler that runs a long fetch cycle keeps its
//! reply channel open without holding up other requests.
//!
//! Every request resolves: with the handler's response, or with a
//! [`BusError`] when nothing listens on the endpoint, the handler vanished
//! without answering, or the configured timeout ran out.
//!
//! ```text
//!   caller ──Envelope{request, reply}──▶ listener ──spawn──▶ handler
//!     ▲                                                        │
//!     └──────────────────── oneshot reply ◀────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use order_sync_core::models::{Site, StoredOrder};

use crate::error::BusError;

/// Queue depth of one endpoint's inbox.
const INBOX_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════════════

/// A message sent to a context. Serialized with an `action` tag, e.g.
/// `{"action":"fetchSiteData","site":"grubhub"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Record the host of the page the user is looking at.
    SetHost { host: String },
    /// Ask the background to start a cycle on `site`.
    FetchSiteData { site: Site },
    /// Background to scraper: run a cycle now.
    FetchData,
    /// Report whether the current site is logged in.
    CheckLoginStatus,
    StoreGrubhubData { orders: Vec<StoredOrder> },
    StoreDoorDashData { orders: Vec<StoredOrder> },
    /// Return both raw order collections.
    GetOrderInsights,
}

impl Request {
    /// The store request carrying `orders` for `site`.
    pub fn store_data(site: Site, orders: Vec<StoredOrder>) -> Self {
        match site {
            Site::Grubhub => Request::StoreGrubhubData { orders },
            Site::DoorDash => Request::StoreDoorDashData { orders },
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::SetHost { .. } => "setHost",
            Request::FetchSiteData { .. } => "fetchSiteData",
            Request::FetchData => "fetchData",
            Request::CheckLoginStatus => "checkLoginStatus",
            Request::StoreGrubhubData { .. } => "storeGrubhubData",
            Request::StoreDoorDashData { .. } => "storeDoorDashData",
            Request::GetOrderInsights => "getOrderInsights",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    FetchingInProgress,
    Failure,
}

/// The single reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_logged_in: Option<bool>,
    /// Number of orders merged by the cycle or store call that answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grubhub_order_results: Option<Vec<StoredOrder>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doordash_order_results: Option<Vec<StoredOrder>>,
}

impl Response {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            error: None,
            is_logged_in: None,
            stored: None,
            grubhub_order_results: None,
            doordash_order_results: None,
        }
    }

    pub fn success() -> Self {
        Self::with_status(Status::Success)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::with_status(Status::Error)
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::with_status(Status::Failure)
        }
    }

    pub fn fetching_in_progress() -> Self {
        Self::with_status(Status::FetchingInProgress)
    }

    pub fn with_login(mut self, is_logged_in: bool) -> Self {
        self.is_logged_in = Some(is_logged_in);
        self
    }

    pub fn with_stored(mut self, stored: usize) -> Self {
        self.stored = Some(stored);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Endpoints and handlers
// ═══════════════════════════════════════════════════════════════════════

/// Address of a context on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Background,
    Scraper(Site),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Background => f.write_str("background"),
            Endpoint::Scraper(site) => write!(f, "scraper:{}", site),
        }
    }
}

/// Serves the requests sent to one endpoint.
///
/// An `Err` is answered as an `error` response. A handler that panics
/// drops its reply channel, which the caller sees as
/// [`BusError::Dropped`].
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> anyhow::Result<Response>;
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Response>,
}

// ═══════════════════════════════════════════════════════════════════════
// Bus
// ═══════════════════════════════════════════════════════════════════════

pub struct MessageBus {
    routes: RwLock<HashMap<Endpoint, mpsc::Sender<Envelope>>>,
    timeout: Duration,
}

impl MessageBus {
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Start serving `endpoint` with `handler`, replacing any previous
    /// registration. The returned task ends when the endpoint is
    /// unregistered or replaced.
    pub async fn register(&self, endpoint: Endpoint, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<Envelope>(INBOX_CAPACITY);
        self.routes.write().await.insert(endpoint, tx);
        tracing::debug!(%endpoint, "endpoint registered");

        tokio::spawn(async move {
            while let Some(Envelope { request, reply }) = rx.recv().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let action = request.action();
                    let response = match handler.handle(request).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::warn!(%endpoint, action, error = %e, "handler failed");
                            Response::error(format!("{:#}", e))
                        }
                    };
                    if reply.send(response).is_err() {
                        tracing::debug!(%endpoint, action, "caller went away before the reply");
                    }
                });
            }
        })
    }

    pub async fn unregister(&self, endpoint: Endpoint) {
        self.routes.write().await.remove(&endpoint);
    }

    pub async fn is_registered(&self, endpoint: Endpoint) -> bool {
        self.routes.read().await.contains_key(&endpoint)
    }

    /// Send `request` to `endpoint` and wait for its response.
    pub async fn request(&self, endpoint: Endpoint, request: Request) -> Result<Response, BusError> {
        let inbox = self
            .routes
            .read()
            .await
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| BusError::NoRoute(endpoint.to_string()))?;

        tracing::debug!(%endpoint, action = request.action(), "bus request");
        let (reply, response) = oneshot::channel();
        inbox
            .send(Envelope { request, reply })
            .await
            .map_err(|_| BusError::NoRoute(endpoint.to_string()))?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BusError::Dropped(endpoint.to_string())),
            Err(_) => Err(BusError::Timeout {
                endpoint: endpoint.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}
