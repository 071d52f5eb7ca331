//! # Timing Helpers
//!
//! Bounded waits and reconnect rate limiting.
//!
//! Every wait in the node is a poll against a [`Deadline`]. A wait ends on
//! success, on expiry, or when its [`CancellationToken`] fires; cancellation
//! is reported exactly like expiry so callers keep a single failure path.
//!
//! All clocks are [`tokio::time::Instant`], which lets tests drive them with
//! paused time.

use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Poll interval used by registration and GNSS waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Absolute deadline with a polling cadence
///
/// # Examples
///
/// ```no_run
/// use smartwaste_node::timing::Deadline;
/// use tokio::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn healthy() -> bool { true }
/// # async fn run() {
/// let cancel = CancellationToken::new();
/// let deadline = Deadline::after(Duration::from_secs(30), Duration::from_secs(1));
/// loop {
///     if healthy().await {
///         break;
///     }
///     if !deadline.tick(&cancel).await {
///         break; // timed out or cancelled
///     }
/// }
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    poll_interval: Duration,
}

impl Deadline {
    /// Creates a deadline `timeout` from now, polled every `poll_interval`
    pub fn after(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            poll_interval,
        }
    }

    /// Returns true once the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Sleeps one poll interval, capped at the remaining time.
    ///
    /// Returns `false` without sleeping when the deadline has already passed
    /// or the token is cancelled, and `false` if cancellation arrives during
    /// the sleep. Returns `true` when the caller should check again.
    pub async fn tick(&self, cancel: &CancellationToken) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() || cancel.is_cancelled() {
            return false;
        }

        tokio::select! {
            _ = sleep(self.poll_interval.min(remaining)) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// Sleeps for `duration` unless cancelled first.
///
/// Returns `true` if the full duration elapsed.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Minimum spacing between reconnect attempts
///
/// The first attempt is always allowed. After that an attempt is only granted
/// once `min_interval` has elapsed since the previously granted one; refused
/// attempts do not move the timer.
#[derive(Debug, Clone)]
pub struct Cooldown {
    min_interval: Duration,
    last_attempt: Option<Instant>,
}

impl Cooldown {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: None,
        }
    }

    /// Claims an attempt slot.
    ///
    /// On success the attempt timestamp is updated to now. On refusal the
    /// time remaining until the next slot is returned.
    pub fn try_begin(&mut self) -> std::result::Result<(), Duration> {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            return Err(remaining);
        }
        self.last_attempt = Some(Instant::now());
        Ok(())
    }

    /// Time until the next attempt is allowed
    pub fn remaining(&self) -> Duration {
        match self.last_attempt {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Timestamp of the last granted attempt
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
