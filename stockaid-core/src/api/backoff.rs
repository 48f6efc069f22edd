//! Exponential backoff after consecutive fetch failures.
//!
//! The cache never retries on its own. Instead, once a provider has failed,
//! the next fetch against it waits out a delay that doubles with each
//! consecutive failure, so a caller retrying in a loop cannot hammer a
//! remote service that is already refusing requests.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    consecutive_failures: u32,
    /// Earliest instant at which the next fetch may start.
    not_before: Option<Instant>,
}

/// Per-provider failure backoff.
#[derive(Debug)]
pub struct FailureBackoff {
    state: Mutex<BackoffState>,
    base_delay: Duration,
    max_delay: Duration,
}

impl FailureBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(BackoffState {
                consecutive_failures: 0,
                not_before: None,
            }),
            base_delay,
            max_delay,
        }
    }

    /// Default backoff: 500 ms doubling per failure, capped at 60 s.
    pub fn default_provider() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }

    fn lock(&self) -> MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay that the next fetch must wait (zero if not backing off).
    pub fn remaining(&self) -> Duration {
        match self.lock().not_before {
            Some(t) => t.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Block until the backoff delay has elapsed.
    pub fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            log::info!("backing off {remaining:?} after repeated fetch failures");
            std::thread::sleep(remaining);
        }
    }

    /// Record a successful fetch: clears the failure streak.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.not_before = None;
    }

    /// Record a failed fetch. `hint` is a provider-suggested delay (e.g. Retry-After)
    /// which takes precedence when longer than the computed delay.
    pub fn record_failure(&self, hint: Option<Duration>) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let exp = state.consecutive_failures.saturating_sub(1).min(16);
        let computed = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let delay = hint.map_or(computed, |h| h.max(computed));
        state.not_before = Some(Instant::now() + delay);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_without_delay() {
        let b = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(b.remaining(), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_per_failure_and_caps() {
        let b = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(3));
        b.record_failure(None);
        assert!(b.remaining() <= Duration::from_secs(1));
        assert!(b.remaining() > Duration::from_millis(900));
        b.record_failure(None);
        assert!(b.remaining() > Duration::from_millis(1900));
        b.record_failure(None);
        assert!(b.remaining() <= Duration::from_secs(3));
        assert_eq!(b.consecutive_failures(), 3);
    }

    #[test]
    fn success_resets() {
        let b = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        b.record_failure(None);
        b.record_success();
        assert_eq!(b.remaining(), Duration::ZERO);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn longer_hint_wins() {
        let b = FailureBackoff::new(Duration::from_millis(10), Duration::from_secs(1));
        b.record_failure(Some(Duration::from_secs(30)));
        assert!(b.remaining() > Duration::from_secs(29));
    }

    #[test]
    fn wait_returns_after_delay() {
        let b = FailureBackoff::new(Duration::from_millis(10), Duration::from_millis(10));
        b.record_failure(None);
        let start = Instant::now();
        b.wait();
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert_eq!(b.remaining(), Duration::ZERO);
    }
}
