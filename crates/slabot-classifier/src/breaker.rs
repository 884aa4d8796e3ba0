//! Circuit breaker guarding AI classifier calls.
//!
//! Per-process in-memory state; multi-process deployments converge
//! independently, which is acceptable for this guard.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use slabot_core::metrics::{BREAKER_STATE, BREAKER_TRANSITIONS};

/// CLOSED → OPEN → HALF_OPEN → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; failures are counted.
    Closed,
    /// Refusing requests until the recovery timeout elapses.
    Open,
    /// Probing: admits requests, closes after enough consecutive successes.
    HalfOpen,
}

impl BreakerState {
    fn gauge_value(self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half_open",
            BreakerState::Open => "open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 2, Duration::from_millis(60_000))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    /// Whether a request may pass. An OPEN breaker admits the next request
    /// once the recovery timeout has elapsed, moving to HALF_OPEN.
    pub fn can_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.timeout {
                    debug!("circuit breaker probing after recovery timeout");
                    transition(&mut inner, BreakerState::HalfOpen);
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    debug!("circuit breaker recovered");
                    transition(&mut inner, BreakerState::Closed);
                    inner.failure_count = 0;
                    inner.last_failure = None;
                }
            }
            BreakerState::Open => {
                // A success while open means a racing request was already
                // in flight before the breaker tripped; treat as recovery
                // evidence but keep refusing until the timeout.
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened after repeated AI failures"
                    );
                    transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker re-opened: probe failed");
                transition(&mut inner, BreakerState::Open);
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Force back to CLOSED, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        transition(&mut inner, BreakerState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn transition(inner: &mut Inner, to: BreakerState) {
    if inner.state != to {
        BREAKER_TRANSITIONS.with_label_values(&[to.label()]).inc();
    }
    inner.state = to;
    BREAKER_STATE.set(to.gauge_value());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tripped(timeout: Duration) -> CircuitBreaker {
        let b = CircuitBreaker::new(5, 2, timeout);
        for _ in 0..5 {
            b.record_failure();
        }
        b
    }

    #[test]
    fn opens_after_failure_threshold() {
        let b = CircuitBreaker::default();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.can_request());
    }

    #[test]
    fn success_resets_the_failure_counter_while_closed() {
        let b = CircuitBreaker::default();
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn admits_probe_after_timeout() {
        // Refuses until the recovery timeout elapses, then admits.
        let b = tripped(Duration::from_millis(40));
        assert!(!b.can_request());
        std::thread::sleep(Duration::from_millis(50));
        assert!(b.can_request());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn two_successes_close_from_half_open() {
        let b = tripped(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.can_request());
        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let b = tripped(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.can_request());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        // The fresh failure restarts the recovery window.
        assert!(!b.can_request());
    }

    #[test]
    fn reset_clears_everything() {
        let b = tripped(Duration::from_secs(60));
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.can_request());
    }
}
