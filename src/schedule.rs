//! Fixed-offset clock and the wait-until-instant scheduler.
//!
//! The portal runs on Greek summer time. Scheduling uses a constant UTC+3
//! offset so results do not depend on the host's timezone database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StartAt;
use crate::constants::PORTAL_UTC_OFFSET_SECS;

/// Longest single sleep while waiting for a target instant.
pub const MAX_WAIT_STEP: Duration = Duration::from_secs(30);

/// Shortest sleep step between clock reads.
pub const MIN_WAIT_STEP: Duration = Duration::from_millis(1);

/// Source of the current portal-local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock shifted to the portal's fixed offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortalClock;

impl Clock for PortalClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&portal_offset())
    }
}

/// The portal's UTC offset.
#[must_use]
pub fn portal_offset() -> FixedOffset {
    FixedOffset::east_opt(PORTAL_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The target instant has passed.
    Reached,
    /// The wait was interrupted before the target.
    Cancelled,
}

/// Run `fut` unless `cancel` fires first. `None` means cancelled.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        () = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// Blocks the control flow until a portal-local instant.
#[derive(Clone)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    max_step: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_step: MAX_WAIT_STEP,
        }
    }

    /// Override the sleep cap, clamped to [`MIN_WAIT_STEP`]..=[`MAX_WAIT_STEP`].
    #[must_use]
    pub fn with_max_step(mut self, max_step: Duration) -> Self {
        self.max_step = max_step.clamp(MIN_WAIT_STEP, MAX_WAIT_STEP);
        self
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sleep until `target`, re-reading the clock after every step.
    ///
    /// Returns immediately when `target` is not in the future.
    pub async fn wait_until(
        &self,
        target: DateTime<FixedOffset>,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let mut announced = false;
        loop {
            let now = self.clock.now();
            let Some(step) = next_step(now, target, self.max_step) else {
                if announced {
                    info!(target = %target.format("%Y-%m-%d %H:%M:%S"), "Scheduled start reached");
                }
                return WaitOutcome::Reached;
            };

            if !announced {
                info!(
                    target = %target.format("%Y-%m-%d %H:%M:%S"),
                    wait_secs = (target - now).num_milliseconds() as f64 / 1000.0,
                    "Waiting for scheduled start (UTC+3)"
                );
                announced = true;
            } else {
                debug!(
                    remaining_secs = (target - now).num_seconds(),
                    "Still waiting for scheduled start"
                );
            }

            tokio::select! {
                () = cancel.cancelled() => return WaitOutcome::Cancelled,
                () = tokio::time::sleep(step) => {}
            }
        }
    }
}

/// How long to sleep before re-checking, or `None` once `now >= target`.
///
/// The step never exceeds `cap` and never overshoots the remaining time.
#[must_use]
pub fn next_step(
    now: DateTime<FixedOffset>,
    target: DateTime<FixedOffset>,
    cap: Duration,
) -> Option<Duration> {
    if now >= target {
        return None;
    }
    let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(cap))
}

/// Resolve the configured start into an absolute portal-local instant.
///
/// `START_AT` wins over `START_DELAY_SECS`. A time of day refers to the
/// current portal-local date even if already past; the caller then starts
/// immediately. Returns `None` when no start is configured.
#[must_use]
pub fn resolve_start(
    start_at: Option<StartAt>,
    start_delay: Option<Duration>,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let offset = *now.offset();
    match start_at {
        Some(StartAt::TimeToday(time)) => now
            .date_naive()
            .and_time(time)
            .and_local_timezone(offset)
            .single(),
        Some(StartAt::DateTime(naive)) => naive.and_local_timezone(offset).single(),
        None => start_delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d),
    }
}
