//! The scheduled poll window.
//!
//! After login and schedule arrival, the poller reloads the target page at a
//! fixed pace, saving every authenticated copy as a new snapshot. Each
//! attempt runs `check session -> (reauthenticate) -> reload -> capture ->
//! assets -> advance`. Per-attempt failures are counted and contained; only
//! a failed re-login or repeated storage failures end the window early.

pub mod assets;
pub mod snapshot;

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{is_logged_in, Authenticator};
use crate::credentials::Credentials;
use crate::schedule::cancellable;
use crate::session::{SessionClient, SessionError};

pub use assets::{extract_asset_links, AssetCollector, AssetRecord};
pub use snapshot::{snapshot_filename, SnapshotRecord, SnapshotStore};

/// Bounds and pacing of one poll window.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Wall time after which no new attempt starts.
    pub window: Duration,
    /// Target spacing between attempt starts.
    pub interval: Duration,
    /// Stop once this many snapshots are saved.
    pub min_successes: u32,
    /// Stop after this many attempts regardless of outcome.
    pub max_attempts: u32,
    /// Abort after this many snapshot writes fail in a row.
    pub max_consecutive_storage_failures: u32,
    pub extract_assets: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MinSuccesses,
    MaxAttempts,
    WindowElapsed,
    Cancelled,
}

/// Counters and artifacts of a finished window.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub successes: u32,
    pub failures: u32,
    pub attempts: u32,
    pub reauthentications: u32,
    pub snapshots: Vec<SnapshotRecord>,
    pub assets: Vec<AssetRecord>,
    pub stop_reason: StopReason,
}

impl PollOutcome {
    fn new() -> Self {
        Self {
            successes: 0,
            failures: 0,
            attempts: 0,
            reauthentications: 0,
            snapshots: Vec::new(),
            assets: Vec::new(),
            stop_reason: StopReason::WindowElapsed,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("re-login rejected on attempt {attempt} after {successes} snapshots")]
    ReauthenticationFailed { attempt: u32, successes: u32 },
    #[error("re-login failed on attempt {attempt}: {source}")]
    Reauthentication {
        attempt: u32,
        #[source]
        source: SessionError,
    },
    #[error("{failures} consecutive snapshot writes failed: {source}")]
    Storage {
        failures: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a single attempt, before counting.
enum Attempt {
    Captured(SnapshotRecord, Vec<AssetRecord>),
    TransportFailed,
    StorageFailed(std::io::Error),
    SessionLost,
    Cancelled,
}

/// Runs the poll window against a session.
pub struct Poller {
    authenticator: Authenticator,
    store: SnapshotStore,
    assets: Option<AssetCollector>,
    settings: PollSettings,
    page_timeout: Duration,
}

impl Poller {
    #[must_use]
    pub fn new(
        authenticator: Authenticator,
        store: SnapshotStore,
        assets: Option<AssetCollector>,
        settings: PollSettings,
        page_timeout: Duration,
    ) -> Self {
        Self {
            authenticator,
            store,
            assets,
            settings,
            page_timeout,
        }
    }

    /// Poll `target_url` until a bound is hit, the session cannot be
    /// recovered, or `cancel` fires.
    ///
    /// The session must already be authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error when re-login fails or snapshots repeatedly cannot be written.
    pub async fn poll_window<S>(
        &mut self,
        session: &mut S,
        target_url: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError>
    where
        S: SessionClient + ?Sized,
    {
        let window_start = Instant::now();
        let mut outcome = PollOutcome::new();
        let mut navigate = true;
        let mut last_reload_failed = false;
        let mut storage_failures = 0u32;

        info!(
            url = %target_url,
            window_secs = self.settings.window.as_secs(),
            interval_secs = self.settings.interval.as_secs(),
            min_successes = self.settings.min_successes,
            max_attempts = self.settings.max_attempts,
            "Starting poll window"
        );

        loop {
            if let Some(reason) = self.stop_reason(&outcome, window_start) {
                outcome.stop_reason = reason;
                break;
            }

            outcome.attempts += 1;
            let attempt = outcome.attempts;
            let attempt_start = Instant::now();
            debug!(attempt, "Poll attempt");

            // Markup after a failed load is an error page, not evidence of logout.
            if !last_reload_failed {
                match self
                    .check_session(session, credentials, cancel, &mut outcome)
                    .await?
                {
                    SessionCheck::Valid => {}
                    SessionCheck::Reauthenticated => navigate = true,
                    SessionCheck::Cancelled => {
                        outcome.stop_reason = StopReason::Cancelled;
                        break;
                    }
                }
            }

            let result = self
                .attempt(session, target_url, navigate, cancel)
                .await;

            last_reload_failed = matches!(result, Attempt::TransportFailed);
            if !last_reload_failed {
                navigate = false;
            }

            match result {
                Attempt::Captured(record, assets) => {
                    storage_failures = 0;
                    outcome.successes += 1;
                    outcome.snapshots.push(record);
                    outcome.assets.extend(assets);
                }
                Attempt::TransportFailed => outcome.failures += 1,
                Attempt::StorageFailed(e) => {
                    outcome.failures += 1;
                    storage_failures += 1;
                    error!(attempt, consecutive = storage_failures, "Snapshot write failed: {e}");
                    if storage_failures >= self.settings.max_consecutive_storage_failures {
                        return Err(PollError::Storage {
                            failures: storage_failures,
                            source: e,
                        });
                    }
                }
                Attempt::SessionLost => {
                    warn!(attempt, "Reloaded page lacks the logged-in marker; session lost");
                }
                Attempt::Cancelled => {
                    outcome.stop_reason = StopReason::Cancelled;
                    break;
                }
            }

            if let Some(reason) = self.stop_reason(&outcome, window_start) {
                outcome.stop_reason = reason;
                break;
            }

            let pause = self.settings.interval.saturating_sub(attempt_start.elapsed());
            if window_start.elapsed() + pause >= self.settings.window {
                outcome.stop_reason = StopReason::WindowElapsed;
                break;
            }
            if !pause.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {
                        outcome.stop_reason = StopReason::Cancelled;
                        break;
                    }
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(
            successes = outcome.successes,
            failures = outcome.failures,
            attempts = outcome.attempts,
            reauthentications = outcome.reauthentications,
            assets = outcome.assets.len(),
            elapsed_secs = window_start.elapsed().as_secs_f64(),
            stop = ?outcome.stop_reason,
            "Poll window finished"
        );
        Ok(outcome)
    }

    fn stop_reason(&self, outcome: &PollOutcome, window_start: Instant) -> Option<StopReason> {
        if outcome.successes >= self.settings.min_successes {
            Some(StopReason::MinSuccesses)
        } else if outcome.attempts >= self.settings.max_attempts {
            Some(StopReason::MaxAttempts)
        } else if window_start.elapsed() >= self.settings.window {
            Some(StopReason::WindowElapsed)
        } else {
            None
        }
    }

    /// Inspect the current markup and log in again if the session is gone.
    async fn check_session<S>(
        &self,
        session: &mut S,
        credentials: &Credentials,
        cancel: &CancellationToken,
        outcome: &mut PollOutcome,
    ) -> Result<SessionCheck, PollError>
    where
        S: SessionClient + ?Sized,
    {
        let attempt = outcome.attempts;
        let markup = match cancellable(cancel, session.content()).await {
            None => return Ok(SessionCheck::Cancelled),
            Some(Ok(markup)) => markup,
            Some(Err(e)) => {
                // The reload below will surface a dead session as a transport failure.
                warn!(attempt, "Could not read page for session check: {e}");
                return Ok(SessionCheck::Valid);
            }
        };
        if is_logged_in(&markup) {
            return Ok(SessionCheck::Valid);
        }

        warn!(attempt, "Session lost, re-authenticating");
        outcome.reauthentications += 1;
        match cancellable(cancel, self.authenticator.authenticate(session, credentials)).await {
            None => Ok(SessionCheck::Cancelled),
            Some(Ok(true)) => {
                info!(attempt, "Re-authenticated");
                Ok(SessionCheck::Reauthenticated)
            }
            Some(Ok(false)) => Err(PollError::ReauthenticationFailed {
                attempt,
                successes: outcome.successes,
            }),
            Some(Err(source)) => Err(PollError::Reauthentication { attempt, source }),
        }
    }

    /// Reload, capture, and collect assets.
    async fn attempt<S>(
        &mut self,
        session: &mut S,
        target_url: &str,
        navigate: bool,
        cancel: &CancellationToken,
    ) -> Attempt
    where
        S: SessionClient + ?Sized,
    {
        let timeout = self.page_timeout;
        let load = async {
            if navigate {
                session.goto(target_url, timeout).await?;
            } else {
                session.reload(timeout).await?;
            }
            session.wait_for_idle(timeout).await
        };
        match cancellable(cancel, load).await {
            None => return Attempt::Cancelled,
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(url = %target_url, "Reload failed: {e}");
                self.save_error_page(session, "reload").await;
                return Attempt::TransportFailed;
            }
        }

        let markup = match cancellable(cancel, session.content()).await {
            None => return Attempt::Cancelled,
            Some(Ok(markup)) => markup,
            Some(Err(e)) => {
                warn!("Could not read reloaded page: {e}");
                return Attempt::TransportFailed;
            }
        };

        if !is_logged_in(&markup) {
            self.store.save_error_page(&markup, "session_lost").await;
            return Attempt::SessionLost;
        }

        let record = match self.store.save_snapshot(&markup).await {
            Ok(record) => record,
            Err(e) => return Attempt::StorageFailed(e),
        };

        let assets = match (&self.assets, self.settings.extract_assets) {
            (Some(collector), true) => {
                let page_url = page_url(session, target_url).await;
                match page_url {
                    Some(page_url) => {
                        cancellable(cancel, collector.collect(session, &markup, &page_url))
                            .await
                            .unwrap_or_default()
                    }
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        };

        Attempt::Captured(record, assets)
    }

    async fn save_error_page<S>(&mut self, session: &mut S, reason: &str)
    where
        S: SessionClient + ?Sized,
    {
        match session.content().await {
            Ok(markup) => {
                self.store.save_error_page(&markup, reason).await;
            }
            Err(e) => debug!("No markup available for error page: {e}"),
        }
    }
}

enum SessionCheck {
    Valid,
    Reauthenticated,
    Cancelled,
}

/// URL the current page was served from, falling back to the target.
async fn page_url<S>(session: &mut S, target_url: &str) -> Option<Url>
where
    S: SessionClient + ?Sized,
{
    let current = session.current_url().await.ok().flatten();
    current
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .or_else(|| Url::parse(target_url).ok())
}
