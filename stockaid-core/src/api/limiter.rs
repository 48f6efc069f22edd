//! Sliding-window rate limiter.
//!
//! Keeps the admission instants of the last `max_requests` requests. A new
//! request is admitted only if fewer than `max_requests` admissions fall
//! inside the trailing `interval`. Admission is decided under the lock;
//! waiting happens outside it, so a blocked caller never holds up others.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// `max_requests` per trailing `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub interval: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            interval,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

/// Blocking rate limiter for a single provider.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            admitted: Mutex::new(VecDeque::with_capacity(limit.max_requests as usize)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.admitted.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Drop admissions that have left the trailing window.
    fn expire(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = admitted.front() {
            if now.duration_since(front) >= self.limit.interval {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit now, or report how long until the oldest admission expires.
    fn admit_or_wait(&self) -> Result<(), Duration> {
        let mut admitted = self.lock();
        let now = Instant::now();
        self.expire(&mut admitted, now);

        if admitted.len() < self.limit.max_requests as usize {
            admitted.push_back(now);
            return Ok(());
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        Err(self
            .limit
            .interval
            .saturating_sub(now.duration_since(oldest)))
    }

    /// Block until a request may be issued. Never fails.
    pub fn acquire(&self) {
        loop {
            match self.admit_or_wait() {
                Ok(()) => return,
                Err(wait) => {
                    debug!("rate limiter: waiting {wait:?}");
                    // A zero wait means the window edge is now; re-check immediately.
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                }
            }
        }
    }

    /// Admit a request only if it can be issued right now.
    pub fn try_acquire(&self) -> bool {
        self.admit_or_wait().is_ok()
    }

    /// Number of requests that could be admitted right now.
    pub fn available(&self) -> u32 {
        let mut admitted = self.lock();
        self.expire(&mut admitted, Instant::now());
        self.limit.max_requests - admitted.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_limit_then_refuses() {
        let limiter = RateLimiter::new(RateLimit::new(3, Duration::from_secs(60)));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn capacity_returns_after_interval() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_millis(20)));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn acquire_blocks_until_window_advances() {
        let interval = Duration::from_millis(50);
        let limiter = RateLimiter::new(RateLimit::new(2, interval));
        let start = Instant::now();
        limiter.acquire();
        limiter.acquire();
        limiter.acquire();
        assert!(start.elapsed() >= interval);
    }

    #[test]
    fn zero_max_requests_is_clamped() {
        let limit = RateLimit::new(0, Duration::from_secs(1));
        assert_eq!(limit.max_requests, 1);
    }

    #[test]
    fn concurrent_callers_never_exceed_limit() {
        let max = 4u32;
        let extra = 3u32;
        let interval = Duration::from_millis(120);
        let limiter = Arc::new(RateLimiter::new(RateLimit::new(max, interval)));
        let start = Instant::now();

        let handles: Vec<_> = (0..max + extra)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    limiter.acquire();
                    Instant::now()
                })
            })
            .collect();

        let mut done: Vec<Instant> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        done.sort();

        // Every call past the first `max` waited a full interval.
        for t in &done[max as usize..] {
            assert!(t.duration_since(start) >= interval);
        }
    }
}
