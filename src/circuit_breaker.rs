//! Circuit breaker guarding the remote store, with lock-free atomics.
//!
//! Unlike a time-based breaker, this one has no half-open phase: once open it stays open until
//! an explicit reconnect-success signal calls [`BackendBreaker::reset`]. While open, the
//! storage façade never touches the remote store.

use crate::clock::{Clock, SystemClock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    /// Remote failures since the last success or reset.
    pub consecutive_failures: usize,
    /// Clock reading of the most recent failure, 0 if none.
    pub last_failure_at_ms: u64,
    /// True while all traffic is routed to the local store.
    pub is_open: bool,
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counted; breaker still closed.
    Counted {
        /// Streak length including this failure.
        consecutive_failures: usize,
    },
    /// This failure crossed the threshold and opened the breaker.
    Opened {
        /// Streak length including this failure.
        consecutive_failures: usize,
    },
    /// The breaker was already open.
    AlreadyOpen,
}

#[derive(Debug)]
struct BreakerCounters {
    open: AtomicBool,
    consecutive_failures: AtomicUsize,
    last_failure_at_ms: AtomicU64,
}

/// Consecutive-failure breaker for a storage backend.
///
/// Clones share the same counters via `Arc`.
#[derive(Debug, Clone)]
pub struct BackendBreaker {
    counters: Arc<BreakerCounters>,
    failure_threshold: usize,
    clock: Arc<dyn Clock>,
}

impl BackendBreaker {
    /// Create a closed breaker. A zero threshold is treated as 1.
    pub fn new(failure_threshold: usize) -> Self {
        Self {
            counters: Arc::new(BreakerCounters {
                open: AtomicBool::new(false),
                consecutive_failures: AtomicUsize::new(0),
                last_failure_at_ms: AtomicU64::new(0),
            }),
            failure_threshold: failure_threshold.max(1),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Failures needed to open.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// True while open.
    pub fn is_open(&self) -> bool {
        self.counters.open.load(Ordering::Acquire)
    }

    /// Snapshot all counters.
    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Acquire),
            last_failure_at_ms: self.counters.last_failure_at_ms.load(Ordering::Acquire),
            is_open: self.is_open(),
        }
    }

    /// A remote call succeeded: only consecutive failures trip the breaker.
    pub fn record_success(&self) {
        if !self.is_open() {
            self.counters.consecutive_failures.store(0, Ordering::Release);
        }
    }

    /// A remote call failed or timed out.
    pub fn record_failure(&self) -> FailureOutcome {
        if self.is_open() {
            return FailureOutcome::AlreadyOpen;
        }
        self.counters.last_failure_at_ms.store(self.clock.now_millis(), Ordering::Release);
        let failures = self.counters.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold
            && self
                .counters
                .open
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::error!(
                failures,
                threshold = self.failure_threshold,
                "remote store circuit → open"
            );
            return FailureOutcome::Opened { consecutive_failures: failures };
        }
        FailureOutcome::Counted { consecutive_failures: failures }
    }

    /// Explicit reconnect success: clear the streak and close. Returns true if it was open.
    pub fn reset(&self) -> bool {
        self.counters.consecutive_failures.store(0, Ordering::Release);
        self.counters.last_failure_at_ms.store(0, Ordering::Release);
        let was_open = self.counters.open.swap(false, Ordering::AcqRel);
        if was_open {
            tracing::info!("remote store circuit → closed");
        }
        was_open
    }
}
