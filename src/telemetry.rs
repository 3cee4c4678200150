//! Telemetry and observability for the limiter.
//!
//! The limiter reports lifecycle, backend health, breaker transitions, cleanup sweeps, and
//! failed-open checks as [`LimiterEvent`]s. Events flow through `TelemetrySink`
//! implementations, which are plain `tower::Service<LimiterEvent>`s and so compose with
//! ordinary tower combinators.
//!
//! # Event Types
//!
//! - **Lifecycle**: `Initialized`, `Shutdown`
//! - **Backend**: `Connected`, `Disconnected`
//! - **Circuit**: `Opened`, `Closed`
//! - **Cleanup**: `Swept`
//! - **Check**: `Failed`
//!
//! # Implementing a Custom Sink
//!
//! ```rust
//! use pacekeeper::telemetry::{LimiterEvent, TelemetrySink};
//! use tower::Service;
//! use std::task::{Context, Poll};
//! use std::pin::Pin;
//! use std::future::Future;
//!
//! #[derive(Clone)]
//! struct PrintSink;
//!
//! impl Service<LimiterEvent> for PrintSink {
//!     type Response = ();
//!     type Error = std::convert::Infallible;
//!     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
//!
//!     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn call(&mut self, event: LimiterEvent) -> Self::Future {
//!         println!("limiter event: {}", event);
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! impl TelemetrySink for PrintSink {
//!     type SinkError = std::convert::Infallible;
//! }
//! ```

mod events;
mod sinks;

pub use events::{
    event_to_json, BackendEvent, CheckEvent, CircuitEvent, CleanupEvent, LifecycleEvent,
    LimiterEvent,
};
pub use sinks::{
    ComposedSinkError, LogSink, MemorySink, MulticastSink, NullSink, StreamingSink, TelemetrySink,
};

use std::fmt;
use std::sync::{Arc, Mutex};
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceExt};

type BoxedSink = BoxCloneService<LimiterEvent, (), BoxError>;

/// Type-erased handle to the configured sink, shared by every limiter component.
///
/// Emission is best-effort: a sink that is not ready or returns an error loses the event and
/// nothing else happens.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<Mutex<BoxedSink>>,
}

impl EventEmitter {
    /// Wrap any telemetry sink.
    pub fn new<S>(sink: S) -> Self
    where
        S: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
        S::Error: std::error::Error + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        let boxed = BoxCloneService::new(sink.map_err(|e| Box::new(e) as BoxError));
        Self { sink: Arc::new(Mutex::new(boxed)) }
    }

    /// Emitter that drops everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    /// Deliver one event. A sink that fails to become ready or rejects the event loses it.
    pub async fn emit(&self, event: LimiterEvent) {
        let sink = match self.sink.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        let outcome = match sink.ready_oneshot().await {
            Ok(mut ready) => ready.call(event).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            tracing::trace!(error = %err, "telemetry event dropped");
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_forwards_to_sink() {
        let memory = MemorySink::new();
        let emitter = EventEmitter::new(memory.clone());
        emitter.emit(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await;
        emitter.clone().emit(LimiterEvent::Circuit(CircuitEvent::Closed)).await;
        assert_eq!(
            memory.events(),
            vec![
                LimiterEvent::Lifecycle(LifecycleEvent::Shutdown),
                LimiterEvent::Circuit(CircuitEvent::Closed),
            ]
        );
    }

    #[derive(Clone)]
    struct Rejecting {
        ready: bool,
    }

    impl Service<LimiterEvent> for Rejecting {
        type Response = ();
        type Error = std::io::Error;
        type Future = std::future::Ready<Result<(), std::io::Error>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            if self.ready {
                std::task::Poll::Ready(Ok(()))
            } else {
                std::task::Poll::Ready(Err(std::io::Error::other("sink closed")))
            }
        }

        fn call(&mut self, _event: LimiterEvent) -> Self::Future {
            std::future::ready(Err(std::io::Error::other("collector unreachable")))
        }
    }

    #[tokio::test]
    async fn failing_sinks_lose_the_event_quietly() {
        for ready in [true, false] {
            let emitter = EventEmitter::new(Rejecting { ready });
            emitter.emit(LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 2 })).await;
        }
    }

    #[tokio::test]
    async fn multicast_delivers_past_a_failing_side() {
        let memory = MemorySink::new();
        let emitter = EventEmitter::new(MulticastSink::new(Rejecting { ready: true }, memory.clone()));
        emitter.emit(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await;
        assert_eq!(memory.events(), vec![LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)]);
    }

    #[tokio::test]
    async fn null_emitter_accepts_everything() {
        EventEmitter::default().emit(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await;
    }
}
