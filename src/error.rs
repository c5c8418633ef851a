//! Typed errors at the seams where callers branch on the kind of failure.
//!
//! Everything else uses `anyhow::Result`.

use thiserror::Error;

/// Failure of a single remote call made while fetching orders.
///
/// Every variant aborts the cycle. Transport and malformed failures inside
/// per-order detail lookups are the exception: they are logged and the order
/// is kept without its detail.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure or a non-success HTTP status.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The response was not JSON, or not the JSON shape the site returns.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The cycle no longer owns the site's fetch guard.
    #[error("fetch lease was taken over by another cycle")]
    LeaseLost,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Failure to obtain any response to a bus request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no context is listening on {0}")]
    NoRoute(String),
    #[error("no response from {endpoint} within {secs}s")]
    Timeout { endpoint: String, secs: u64 },
    #[error("{0} dropped the request without responding")]
    Dropped(String),
}

/// Reads a response body as JSON, mapping non-success statuses to
/// [`FetchError::Transport`] and unparsable bodies to [`FetchError::Malformed`].
pub async fn json_body(resp: reqwest::Response) -> Result<serde_json::Value, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(FetchError::Transport(format!("HTTP {}: {}", status, snippet)));
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| FetchError::Malformed(e.to_string()))
}
