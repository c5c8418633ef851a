//! HTTP bridge onto the message bus.
//!
//! Lets out-of-process clients (a browser page, a script, `curl`) talk to
//! the background context with the same messages contexts exchange
//! internally.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/messages` | Send a `Request` to the background context, get its `Response` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Bus responses are returned with `200` whatever their `status`. Only
//! failures to get a response at all use an HTTP error:
//!
//! ```json
//! { "error": { "code": "timeout", "message": "no response from background within 900s" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so extension pages and
//! local dashboards can call the bridge.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bus::{Endpoint, MessageBus, Request, Response};
use crate::config::Config;
use crate::error::BusError;

/// Build the bridge router over `bus`.
pub fn router(bus: Arc<MessageBus>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/messages", post(handle_message))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(bus)
}

/// Serve the bridge on `[server].bind` until the process ends.
pub async fn run_server(config: &Config, bus: Arc<MessageBus>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "message bridge listening");
    println!("Message bridge listening on http://{}", bind_addr);

    axum::serve(listener, router(bus)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> HttpResponse {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        let (status, code) = match &err {
            BusError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            BusError::NoRoute(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            BusError::Dropped(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /messages ============

/// Handler for `POST /messages`.
///
/// The body is parsed by hand rather than with the `Json<Request>`
/// extractor so unknown actions come back in the error contract above.
async fn handle_message(
    State(bus): State<Arc<MessageBus>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Response>, AppError> {
    let request: Request = serde_json::from_value(body)
        .map_err(|e| bad_request(format!("invalid message: {}", e)))?;
    if matches!(request, Request::FetchData) {
        return Err(bad_request("fetchData is internal; use fetchSiteData"));
    }

    let response = bus.request(Endpoint::Background, request).await?;
    Ok(Json(response))
}
