//! Retention sweeper for persisted window rows.
//!
//! Retention bounds storage growth; it has nothing to do with correctness.
//! Rows whose window ended more than the horizon ago are deleted regardless of
//! what any local cache holds. Failures are logged and retried on the next
//! scheduled run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::store::CounterStore;
use crate::task::PeriodicTask;
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TelemetrySink};

/// Periodically purges expired rows from a [`CounterStore`].
pub struct RetentionSweeper<S, T = NullSink> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sink: T,
    task: Mutex<Option<PeriodicTask>>,
}

impl<S> RetentionSweeper<S, NullSink>
where
    S: CounterStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store, clock: Arc::new(SystemClock), sink: NullSink, task: Mutex::new(None) }
    }
}

impl<S, T> RetentionSweeper<S, T>
where
    S: CounterStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sink<T2>(self, sink: T2) -> RetentionSweeper<S, T2>
    where
        T2: TelemetrySink,
        T2::Future: Send + 'static,
    {
        RetentionSweeper { store: self.store, clock: self.clock, sink, task: self.task }
    }

    /// Delete rows whose window ended more than `horizon` ago.
    ///
    /// Returns the number of rows deleted.
    pub async fn purge_expired(&self, horizon: Duration) -> Result<u64, S::Error> {
        purge(&*self.store, &*self.clock, &self.sink, horizon).await
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval`.
    /// Calling it again while running is a no-op, and a zero `interval` is
    /// refused with a warning.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(&self, interval: Duration, horizon: Duration) {
        if interval.is_zero() {
            tracing::warn!(target: "tollgate::retention", "retention interval is zero; sweeper not started");
            return;
        }
        let mut slot = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let store = self.store.clone();
        let clock = self.clock.clone();
        let sink = self.sink.clone();
        *slot = Some(PeriodicTask::spawn("retention_sweep", interval, move || {
            let store = store.clone();
            let clock = clock.clone();
            let sink = sink.clone();
            async move {
                // Already logged and emitted; the next tick retries.
                let _ = purge(&*store, &*clock, &sink, horizon).await;
            }
        }));
    }

    /// [`start`](Self::start) with the interval and horizon from `config`.
    pub fn start_with_config(&self, config: &LimiterConfig) {
        self.start(config.retention_interval(), config.retention_horizon());
    }

    /// Stop the periodic purge and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

async fn purge<S, T>(store: &S, clock: &dyn Clock, sink: &T, horizon: Duration) -> Result<u64, S::Error>
where
    S: CounterStore + ?Sized,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    let horizon_ms = u64::try_from(horizon.as_millis()).unwrap_or(u64::MAX);
    let cutoff = clock.now_millis().saturating_sub(horizon_ms);
    match store.delete_older_than(cutoff).await {
        Ok(deleted) => {
            tracing::info!(target: "tollgate::retention", deleted, cutoff, "purged expired window rows");
            emit_best_effort(sink.clone(), LimiterEvent::RetentionPurged { deleted, cutoff }).await;
            Ok(deleted)
        }
        Err(e) => {
            tracing::warn!(target: "tollgate::retention", error = %e, cutoff, "retention purge failed; will retry next run");
            emit_best_effort(sink.clone(), LimiterEvent::RetentionFailed { cause: e.to_string() }).await;
            Err(e)
        }
    }
}
