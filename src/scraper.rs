//! Per-site scraper context.
//!
//! Holds the site's session monitor and fetch coordinator and answers the
//! two requests the background forwards to it: `fetchData` and
//! `checkLoginStatus`.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use order_sync_core::models::Site;

use crate::bus::{MessageHandler, Request, Response};
use crate::coordinator::FetchCoordinator;
use crate::session::{LoginAction, LoginCheck, SessionMonitor};

pub struct ScraperContext {
    monitor: Arc<SessionMonitor>,
    coordinator: Arc<FetchCoordinator>,
}

impl ScraperContext {
    pub fn new(monitor: Arc<SessionMonitor>, coordinator: Arc<FetchCoordinator>) -> Self {
        Self {
            monitor,
            coordinator,
        }
    }

    pub fn site(&self) -> Site {
        self.coordinator.site()
    }

    /// Start-up sequence: wait for a login, then check it actively.
    ///
    /// A first login (or an account switch) only resets the session, so a
    /// second active check follows to run the backfill. Returns `None` when
    /// no login showed up before polling gave up.
    pub async fn run(&self) -> Result<Option<LoginCheck>> {
        if !self.monitor.wait_for_login().await {
            return Ok(None);
        }
        self.sync_now().await.map(Some)
    }

    /// One active check, repeated once if it only reset the session.
    pub async fn sync_now(&self) -> Result<LoginCheck> {
        let check = self.monitor.check_status(false).await?;
        if check.action == LoginAction::SessionReset {
            return self.monitor.check_status(false).await;
        }
        Ok(check)
    }
}

#[async_trait]
impl MessageHandler for ScraperContext {
    async fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::FetchData => Ok(self.coordinator.request_fetch().await.to_response()),
            Request::CheckLoginStatus => {
                let check = self.monitor.check_status(true).await?;
                Ok(Response::success().with_login(check.is_logged_in))
            }
            other => Ok(Response::error(format!(
                "{} is not handled by the {} scraper",
                other.action(),
                self.site()
            ))),
        }
    }
}
