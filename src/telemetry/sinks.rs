use super::events::{CheckEvent, CircuitEvent, CleanupEvent, LimiterEvent};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tower::Service;

/// A telemetry sink that consumes limiter events.
pub trait TelemetrySink:
    tower::Service<LimiterEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + Sync + 'static;
}

type Recorded = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

fn recorded() -> Recorded {
    Box::pin(std::future::ready(Ok(())))
}

/// Discards every event. The default when no sink is configured.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<LimiterEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Recorded;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: LimiterEvent) -> Self::Future {
        recorded()
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing`.
///
/// Degraded events log at `warn`, sweeps at `debug`, everything else at `info`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<LimiterEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Recorded;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        if event.is_degraded() {
            tracing::warn!(target: "pacekeeper::events", %event, "limiter degraded");
        } else if let LimiterEvent::Cleanup(CleanupEvent::Swept { expired, evicted, remaining }) =
            &event
        {
            tracing::debug!(target: "pacekeeper::events", expired, evicted, remaining, "local store swept");
        } else {
            tracing::info!(target: "pacekeeper::events", %event, "limiter event");
        }
        recorded()
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory. Clones share the buffer.
///
/// Once full, each new event pushes out the oldest one.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<LimiterEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1_024)))),
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Buffered events, oldest first.
    pub fn events(&self) -> Vec<LimiterEvent> {
        self.events.lock().map(|g| g.iter().cloned().collect()).unwrap_or_default()
    }

    /// Breaker transitions, in order.
    pub fn circuit_transitions(&self) -> Vec<CircuitEvent> {
        self.collect(|event| match event {
            LimiterEvent::Circuit(transition) => Some(*transition),
            _ => None,
        })
    }

    /// Checks that failed open, in order.
    pub fn failed_checks(&self) -> Vec<CheckEvent> {
        self.collect(|event| match event {
            LimiterEvent::Check(check) => Some(check.clone()),
            _ => None,
        })
    }

    /// Number of buffered events matching `pred`.
    pub fn count(&self, pred: impl Fn(&LimiterEvent) -> bool) -> usize {
        self.events.lock().map(|g| g.iter().filter(|e| pred(*e)).count()).unwrap_or(0)
    }

    fn collect<T>(&self, pick: impl Fn(&LimiterEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().map(|g| g.iter().filter_map(&pick).collect()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events pushed out by newer ones.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<LimiterEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Recorded;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        if let Ok(mut guard) = self.events.lock() {
            if guard.len() >= self.capacity {
                guard.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(event);
        }
        recorded()
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Broadcasts events to live subscribers, for example a health endpoint watching for an open
/// breaker.
///
/// Events sent while nobody is subscribed are counted as dropped. A lagging subscriber loses
/// the oldest events it has not read.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: broadcast::Sender<LimiterEvent>,
    degraded_only: bool,
    dropped: Arc<AtomicU64>,
}

impl StreamingSink {
    /// Stream every event.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, degraded_only: false, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Stream only events for which [`LimiterEvent::is_degraded`] holds.
    pub fn degraded_only(capacity: usize) -> Self {
        Self { degraded_only: true, ..Self::new(capacity) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events that had no subscriber to go to.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Service<LimiterEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = Recorded;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        if (!self.degraded_only || event.is_degraded()) && self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        recorded()
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
}

/// Error from one side of a [`MulticastSink`].
#[derive(Debug, thiserror::Error)]
#[error("telemetry sink error: {0}")]
pub struct ComposedSinkError(#[source] Box<dyn std::error::Error + Send + Sync>);

/// Sends every event to two sinks concurrently. Both always receive the event; the first
/// error is reported.
///
/// ```rust
/// use pacekeeper::telemetry::{LogSink, MemorySink, MulticastSink};
///
/// let memory = MemorySink::new();
/// let _both = MulticastSink::new(LogSink, memory.clone());
/// ```
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    first: A,
    second: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> Service<LimiterEvent> for MulticastSink<A, B>
where
    A: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        let first = self.first.clone().call(event.clone());
        let second = self.second.clone().call(event);
        Box::pin(async move {
            let (first, second) = tokio::join!(first, second);
            first.map_err(|e| ComposedSinkError(Box::new(e)))?;
            second.map_err(|e| ComposedSinkError(Box::new(e)))
        })
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}
