//! Owned periodic background tasks.
//!
//! Both sweepers run on a [`PeriodicTask`]: an interval loop with a shutdown
//! signal. Dropping the handle aborts the loop, so a test that forgets to call
//! `stop` does not leak a timer into the next test.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running interval loop.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first run happens one full period after start.
    ///
    /// `period` must be non-zero; callers validate it before spawning.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(target: "tollgate::task", task = name, "periodic task stopped");
        });
        let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(target: "tollgate::task", task = name, period_ms, "periodic task started");
        Self { name, shutdown, handle: Some(handle) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// A tick already in progress is allowed to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
