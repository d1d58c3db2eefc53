use super::events::LimiterEvent;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tower::Service;

/// A `tower::Service<LimiterEvent>` the engine and sweepers can emit into.
pub trait TelemetrySink:
    Service<LimiterEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Waits for `sink` to be ready, sends `event`, and ignores any error.
pub async fn emit_best_effort<S>(sink: S, event: LimiterEvent)
where
    S: Service<LimiterEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut sink) = sink.ready_oneshot().await {
        let _ = sink.call(event).await;
    }
}

/// Sinks that accept every event synchronously.
type Accepted = Ready<Result<(), Infallible>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<LimiterEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: LimiterEvent) -> Accepted {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes each event as an `info` line on the `tollgate::telemetry` target.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<LimiterEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Accepted {
        tracing::info!(target: "tollgate::telemetry", event = %event, "limiter_event");
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory. Clones share the buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LimiterEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Once `capacity` events are held, each new one evicts the oldest.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::default(), capacity: capacity.max(1), evicted: Arc::default() }
    }

    pub fn events(&self) -> Vec<LimiterEvent> {
        self.buffer().clone()
    }

    pub fn clear(&self) {
        self.buffer().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events pushed out by newer ones.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<LimiterEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: LimiterEvent) {
        let mut buffer = self.buffer();
        if buffer.len() == self.capacity {
            buffer.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push(event);
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
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Accepted {
        self.record(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Hands events to a worker task over a bounded channel so emitting never
/// waits on the wrapped sink.
///
/// When the channel is full the event is dropped and counted.
#[derive(Clone, Debug)]
pub struct NonBlockingSink {
    queue: mpsc::Sender<LimiterEvent>,
    dropped: Arc<AtomicU64>,
}

impl NonBlockingSink {
    /// Spawn the forwarding worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn with_capacity<S>(sink: S, capacity: usize) -> Self
    where
        S: Service<LimiterEvent, Response = ()> + Send + Clone + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (queue, mut pending) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                emit_best_effort(sink.clone(), event).await;
            }
        });
        Self { queue, dropped: Arc::default() }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Service<LimiterEvent> for NonBlockingSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Accepted {
        if let Err(mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event)) =
            self.queue.try_send(event)
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target: "tollgate::telemetry", event = %event, "telemetry queue full; event dropped");
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for NonBlockingSink {
    type SinkError = Infallible;
}
