#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

use tollgate::{
    AdmissionEngine, CounterStore, InMemoryCounterStore, LimiterConfig, ManualClock, ResetOutcome,
    RoutePolicy, WindowRecord,
};

/// A store whose every call fails, standing in for an unreachable database.
#[derive(Clone, Debug, Default)]
pub struct FailingStore {
    pub calls: Arc<AtomicUsize>,
}

impl FailingStore {
    fn fail<T>(&self, op: &str) -> Result<T, io::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, format!("{op}: store unreachable")))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    type Error = io::Error;

    async fn conditional_increment(&self, _key: &str, _max: u32, _now: u64) -> Result<bool, Self::Error> {
        self.fail("conditional_increment")
    }

    async fn read_record(&self, _key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        self.fail("read_record")
    }

    async fn upsert_reset(&self, _key: &str, _window_end: u64, _now: u64) -> Result<ResetOutcome, Self::Error> {
        self.fail("upsert_reset")
    }

    async fn delete_older_than(&self, _cutoff: u64) -> Result<u64, Self::Error> {
        self.fail("delete_older_than")
    }
}

/// Call counters for [`CountingStore`].
#[derive(Debug, Default)]
pub struct Calls {
    pub increments: AtomicUsize,
    pub reads: AtomicUsize,
    pub resets: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
            + self.reads.load(Ordering::SeqCst)
            + self.resets.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

/// Wraps a store and counts every call that reaches it.
#[derive(Clone, Debug, Default)]
pub struct CountingStore<S = InMemoryCounterStore> {
    pub inner: S,
    pub calls: Arc<Calls>,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, calls: Arc::new(Calls::default()) }
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for CountingStore<S> {
    type Error = S::Error;

    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error> {
        self.calls.increments.fetch_add(1, Ordering::SeqCst);
        self.inner.conditional_increment(key, max, now).await
    }

    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_record(key).await
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_reset(key, window_end, now).await
    }

    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_older_than(cutoff).await
    }
}

/// Delays every call by a fixed amount before delegating.
#[derive(Clone, Debug)]
pub struct SlowStore<S = InMemoryCounterStore> {
    pub inner: S,
    pub delay: Duration,
}

#[async_trait]
impl<S: CounterStore> CounterStore for SlowStore<S> {
    type Error = S::Error;

    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.conditional_increment(key, max, now).await
    }

    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_record(key).await
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_reset(key, window_end, now).await
    }

    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_older_than(cutoff).await
    }
}

/// Healthy until switched to failing, then every call errors.
#[derive(Clone, Debug, Default)]
pub struct SwitchableStore {
    pub inner: InMemoryCounterStore,
    failing: Arc<AtomicBool>,
}

impl SwitchableStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), io::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for SwitchableStore {
    type Error = io::Error;

    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error> {
        self.check()?;
        Ok(self.inner.conditional_increment(key, max, now).await.unwrap_or_default())
    }

    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        self.check()?;
        Ok(self.inner.read_record(key).await.unwrap_or_default())
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        self.check()?;
        match self.inner.upsert_reset(key, window_end, now).await {
            Ok(outcome) => Ok(outcome),
            Err(never) => match never {},
        }
    }

    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error> {
        self.check()?;
        Ok(self.inner.delete_older_than(cutoff).await.unwrap_or_default())
    }
}

/// Every increment is refused, every read misses, and every reset loses the
/// race, as if other instances kept replacing the window underneath us.
#[derive(Clone, Debug, Default)]
pub struct ContendedStore {
    pub calls: Arc<Calls>,
}

#[async_trait]
impl CounterStore for ContendedStore {
    type Error = io::Error;

    async fn conditional_increment(&self, _key: &str, _max: u32, _now: u64) -> Result<bool, Self::Error> {
        self.calls.increments.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    async fn read_record(&self, _key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
        Ok(ResetOutcome::Lost(WindowRecord { key: key.into(), count: 0, window_end, last_request_at: now }))
    }

    async fn delete_older_than(&self, _cutoff: u64) -> Result<u64, Self::Error> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

/// Config with a single configured route.
pub fn single_route(route: &str, window_secs: u64, max: u32) -> LimiterConfig {
    LimiterConfig::default().with_route(route, RoutePolicy::new(window_secs, max))
}

/// Engine over `store` with a manual clock starting at t=0.
pub fn engine_at_zero<S: CounterStore + 'static>(
    store: S,
    config: LimiterConfig,
) -> (AdmissionEngine<S>, ManualClock) {
    let clock = ManualClock::at_secs(0);
    let engine = AdmissionEngine::builder(store).config(config).clock(clock.clone()).build().unwrap();
    (engine, clock)
}

/// Let detached write-through tasks run to completion.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);
impl io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures everything logged while the returned guard is alive.
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buffer, _guard: guard }
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }
}
