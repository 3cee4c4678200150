use serde_json::json;
use std::fmt;

/// Events emitted by the limiter.
///
/// These describe lifecycle, backend health, breaker transitions, cleanup sweeps, and checks
/// that failed open. They can be logged, aggregated, or forwarded to external systems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// Construction and teardown
    Lifecycle(LifecycleEvent),
    /// Remote store connectivity
    Backend(BackendEvent),
    /// Circuit breaker transitions
    Circuit(CircuitEvent),
    /// Local store sweeps
    Cleanup(CleanupEvent),
    /// Per-check failures
    Check(CheckEvent),
}

/// Limiter lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Construction finished and background tasks are running.
    Initialized {
        /// Name of the primary backend (`"local"` when no remote store is configured).
        backend: &'static str,
    },
    /// `close()` stopped the background tasks and released the backend.
    Shutdown,
}

/// Remote store connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The remote store answered a startup or reconnect ping.
    Connected {
        /// Backend name.
        backend: &'static str,
    },
    /// The remote store failed after a healthy period; traffic for the failing call went to
    /// the local store.
    Disconnected {
        /// Backend name.
        backend: &'static str,
        /// Error text of the failing call.
        error: String,
    },
}

/// Circuit breaker transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    /// The breaker opened; all traffic now uses the local store.
    Opened {
        /// Consecutive failures that triggered the open
        failure_count: usize,
    },
    /// A reconnect success closed the breaker.
    Closed,
}

/// Cleanup Scheduler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupEvent {
    /// One sweep of the local store finished.
    Swept {
        /// Entries removed because they expired
        expired: usize,
        /// Entries removed to get under the capacity ceiling
        evicted: usize,
        /// Entries left
        remaining: usize,
    },
}

/// Per-check outcomes worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckEvent {
    /// Evaluation raised an error and the check failed open.
    Failed {
        /// Domain being checked.
        domain: String,
        /// Caller-supplied identifier.
        identifier: String,
        /// Error text.
        error: String,
    },
}

impl LimiterEvent {
    /// True for events reporting that the limiter is degraded: a remote that stopped
    /// answering, an open breaker, or a check that failed open.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            LimiterEvent::Backend(BackendEvent::Disconnected { .. })
                | LimiterEvent::Circuit(CircuitEvent::Opened { .. })
                | LimiterEvent::Check(CheckEvent::Failed { .. })
        )
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Lifecycle(event) => write!(f, "Lifecycle::{}", event),
            LimiterEvent::Backend(event) => write!(f, "Backend::{}", event),
            LimiterEvent::Circuit(event) => write!(f, "Circuit::{}", event),
            LimiterEvent::Cleanup(event) => write!(f, "Cleanup::{}", event),
            LimiterEvent::Check(event) => write!(f, "Check::{}", event),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Initialized { backend } => write!(f, "Initialized(backend={})", backend),
            LifecycleEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendEvent::Connected { backend } => write!(f, "Connected({})", backend),
            BackendEvent::Disconnected { backend, error } => {
                write!(f, "Disconnected({}, error={})", backend, error)
            }
        }
    }
}

impl fmt::Display for CircuitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitEvent::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for CleanupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupEvent::Swept { expired, evicted, remaining } => write!(
                f,
                "Swept(expired={}, evicted={}, remaining={})",
                expired, evicted, remaining
            ),
        }
    }
}

impl fmt::Display for CheckEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckEvent::Failed { domain, identifier, error } => {
                write!(f, "Failed({}/{}: {})", domain, identifier, error)
            }
        }
    }
}

/// Convert a LimiterEvent into a JSON value for sinks.
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    match event {
        LimiterEvent::Lifecycle(l) => match l {
            LifecycleEvent::Initialized { backend } => {
                json!({ "kind": "initialized", "backend": backend })
            }
            LifecycleEvent::Shutdown => json!({ "kind": "shutdown" }),
        },
        LimiterEvent::Backend(b) => match b {
            BackendEvent::Connected { backend } => {
                json!({ "kind": "backend_connected", "backend": backend })
            }
            BackendEvent::Disconnected { backend, error } => json!({
                "kind": "backend_disconnected",
                "backend": backend,
                "error": error,
            }),
        },
        LimiterEvent::Circuit(c) => match c {
            CircuitEvent::Opened { failure_count } => {
                json!({ "kind": "circuit_opened", "failures": *failure_count })
            }
            CircuitEvent::Closed => json!({ "kind": "circuit_closed" }),
        },
        LimiterEvent::Cleanup(CleanupEvent::Swept { expired, evicted, remaining }) => json!({
            "kind": "cleanup",
            "expired": *expired,
            "evicted": *evicted,
            "remaining": *remaining,
        }),
        LimiterEvent::Check(CheckEvent::Failed { domain, identifier, error }) => json!({
            "kind": "check_failed",
            "domain": domain,
            "identifier": identifier,
            "error": error,
        }),
    }
}

#[cfg(test)]
mod json_tests {
    use super::*;

    #[test]
    fn initialized_json() {
        let v = event_to_json(&LimiterEvent::Lifecycle(LifecycleEvent::Initialized {
            backend: "redis",
        }));
        assert_eq!(v["kind"], "initialized");
        assert_eq!(v["backend"], "redis");
    }

    #[test]
    fn backend_disconnected_json() {
        let v = event_to_json(&LimiterEvent::Backend(BackendEvent::Disconnected {
            backend: "redis",
            error: "connection refused".into(),
        }));
        assert_eq!(v["kind"], "backend_disconnected");
        assert_eq!(v["error"], "connection refused");
    }

    #[test]
    fn circuit_opened_json() {
        let v = event_to_json(&LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 4 }));
        assert_eq!(v["kind"], "circuit_opened");
        assert_eq!(v["failures"], 4);
    }

    #[test]
    fn circuit_closed_json() {
        let v = event_to_json(&LimiterEvent::Circuit(CircuitEvent::Closed));
        assert_eq!(v["kind"], "circuit_closed");
    }

    #[test]
    fn cleanup_json() {
        let v = event_to_json(&LimiterEvent::Cleanup(CleanupEvent::Swept {
            expired: 3,
            evicted: 2,
            remaining: 10,
        }));
        assert_eq!(v["kind"], "cleanup");
        assert_eq!(v["expired"], 3);
        assert_eq!(v["evicted"], 2);
        assert_eq!(v["remaining"], 10);
    }

    #[test]
    fn check_failed_json() {
        let v = event_to_json(&LimiterEvent::Check(CheckEvent::Failed {
            domain: "shop.example".into(),
            identifier: "10.0.0.1".into(),
            error: "boom".into(),
        }));
        assert_eq!(v["kind"], "check_failed");
        assert_eq!(v["domain"], "shop.example");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_event_display() {
        let event = LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 5 });
        assert_eq!(event.to_string(), "Circuit::Opened(failures=5)");
    }

    #[test]
    fn degraded_events() {
        assert!(LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 1 }).is_degraded());
        assert!(LimiterEvent::Backend(BackendEvent::Disconnected {
            backend: "redis",
            error: "refused".into(),
        })
        .is_degraded());
        assert!(!LimiterEvent::Circuit(CircuitEvent::Closed).is_degraded());
        assert!(!LimiterEvent::Backend(BackendEvent::Connected { backend: "redis" }).is_degraded());
        assert!(!LimiterEvent::Lifecycle(LifecycleEvent::Shutdown).is_degraded());
    }

    #[test]
    fn test_cleanup_event_display() {
        let event = CleanupEvent::Swept { expired: 1, evicted: 0, remaining: 9 };
        assert!(event.to_string().contains("expired=1"));
    }

    #[test]
    fn test_check_event_display() {
        let event = LimiterEvent::Check(CheckEvent::Failed {
            domain: "d".into(),
            identifier: "i".into(),
            error: "e".into(),
        });
        assert_eq!(event.to_string(), "Check::Failed(d/i: e)");
    }
}
