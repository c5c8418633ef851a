//! Login and session-identity tracking for one site.
//!
//! The monitor turns auth samples into store state and decides when a
//! fetch cycle should run:
//!
//! | Observation | Effect |
//! |-------------|--------|
//! | logged out | `<site>LoggedIn = false`, fetch flag forced to `Idle` |
//! | logged in, passive check | `<site>LoggedIn = true`, nothing else |
//! | logged in, new session id | session id stored, order collection cleared, no fetch yet |
//! | logged in, same session id | fetch triggered unless one is running |
//!
//! The session id is a digest of the auth token (see
//! [`derive_session_id`]); a change means another account logged in on
//! this machine and the stored orders are not theirs.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use order_sync_core::models::{derive_session_id, AuthSignal, Session, Site};
use order_sync_core::store::{self, keys, KvStore};

use crate::config::SessionConfig;
use crate::coordinator::{FetchCoordinator, FetchOutcome};
use crate::traits::AuthProbe;

/// What a status check did besides recording the login flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAction {
    LoggedOut,
    Passive,
    /// A different account was detected and the stored orders were dropped.
    SessionReset,
    FetchTriggered(FetchOutcome),
    /// Same session, but a cycle already holds the guard.
    SkippedInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCheck {
    pub is_logged_in: bool,
    pub action: LoginAction,
}

pub struct SessionMonitor {
    site: Site,
    auth: Arc<dyn AuthProbe>,
    store: Arc<dyn KvStore>,
    coordinator: Arc<FetchCoordinator>,
    config: SessionConfig,
}

impl SessionMonitor {
    pub fn new(
        auth: Arc<dyn AuthProbe>,
        store: Arc<dyn KvStore>,
        coordinator: Arc<FetchCoordinator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            site: coordinator.site(),
            auth,
            store,
            coordinator,
            config,
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    /// Current auth signal, `None` when logged out.
    pub async fn sample_login(&self) -> Option<AuthSignal> {
        self.auth.sample().await
    }

    /// The session as last recorded in the store.
    pub async fn current_session(&self) -> Result<Session> {
        let store = self.store.as_ref();
        Ok(Session {
            site: self.site,
            session_id: store::read(store, &keys::session_id(self.site)).await?,
            is_logged_in: store::read(store, &keys::logged_in(self.site))
                .await?
                .unwrap_or(false),
        })
    }

    /// Sample the login state, record it, and act on it.
    ///
    /// A passive check only records. An active check may reset the session
    /// or trigger a fetch cycle, and waits for that cycle to finish.
    pub async fn check_status(&self, passive: bool) -> Result<LoginCheck> {
        let site = self.site;
        let signal = self.sample_login().await;
        let is_logged_in = signal.is_some();
        store::write(self.store.as_ref(), &keys::logged_in(site), &is_logged_in).await?;

        let Some(signal) = signal else {
            self.coordinator.guard().force_idle().await?;
            tracing::debug!(%site, "logged out");
            return Ok(LoginCheck {
                is_logged_in,
                action: LoginAction::LoggedOut,
            });
        };

        if passive {
            return Ok(LoginCheck {
                is_logged_in,
                action: LoginAction::Passive,
            });
        }

        let candidate = derive_session_id(site, &signal);
        let stored: Option<String> = store::read(self.store.as_ref(), &keys::session_id(site)).await?;

        let action = if stored.as_deref() != Some(candidate.as_str()) {
            self.reset_session(&candidate, stored.is_some()).await?;
            LoginAction::SessionReset
        } else if self.coordinator.guard().is_held().await? {
            tracing::debug!(%site, "cycle running, not triggering another");
            LoginAction::SkippedInProgress
        } else {
            LoginAction::FetchTriggered(self.coordinator.request_fetch().await)
        };

        Ok(LoginCheck {
            is_logged_in,
            action,
        })
    }

    async fn reset_session(&self, session_id: &str, had_previous: bool) -> Result<()> {
        let site = self.site;
        if had_previous {
            tracing::info!(%site, "account changed, clearing stored orders");
        } else {
            tracing::info!(%site, "first login seen, starting a new session");
        }
        store::write(self.store.as_ref(), &keys::session_id(site), session_id).await?;
        self.store.remove(&keys::order_results(site)).await?;
        Ok(())
    }

    /// Poll until the site is logged in. Gives up after
    /// `session.max_poll_attempts` samples and returns `false`.
    ///
    /// The login flag is recorded as soon as a login is seen, so viewers
    /// learn of it before the follow-up active check finishes.
    pub async fn wait_for_login(&self) -> bool {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        for attempt in 1..=self.config.max_poll_attempts {
            if self.sample_login().await.is_some() {
                if let Err(e) = store::write(self.store.as_ref(), &keys::logged_in(self.site), &true).await {
                    tracing::warn!(site = %self.site, error = %e, "failed to record login");
                }
                return true;
            }
            if attempt < self.config.max_poll_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::info!(site = %self.site, attempts = self.config.max_poll_attempts, "gave up waiting for login");
        false
    }
}
