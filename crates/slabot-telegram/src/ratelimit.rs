//! In-memory per-user message-frequency limiter.
//!
//! Protects the classifier (and the AI budget behind it) from flooding
//! senders. Message rows are still appended to the log; only the
//! classification step is skipped for rate-limited users.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_LIMIT: u32 = 20;
/// Entries idle longer than this are dropped by the sweep.
const SWEEP_IDLE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<i64, Window>,
    limit: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
        }
    }

    /// Record one message from `user_id` and report whether it is within
    /// the per-minute budget.
    pub fn allow(&self, user_id: i64) -> bool {
        let mut entry = self.windows.entry(user_id).or_insert_with(|| Window {
            started: Instant::now(),
            count: 0,
        });
        if entry.started.elapsed() >= WINDOW {
            entry.started = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;
        let allowed = entry.count <= self.limit;
        if !allowed {
            debug!(user_id, count = entry.count, "user rate limited");
        }
        allowed
    }

    /// Drop entries idle past the sweep horizon. Called periodically from
    /// a background task.
    pub fn sweep(&self) {
        self.windows.retain(|_, w| w.started.elapsed() < SWEEP_IDLE);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
        // A different user has an independent window.
        assert!(limiter.allow(2));
    }

    #[test]
    fn sweep_keeps_recent_windows() {
        let limiter = RateLimiter::new(3);
        limiter.allow(1);
        limiter.sweep();
        assert_eq!(limiter.len(), 1);
    }
}
