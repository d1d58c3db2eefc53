//! Admission decision engine.
//!
//! Orchestrates the two tiers for every protected request:
//!
//! 1. **Kill switch**: when the policy table is disabled every check is
//!    allowed without touching the cache or the store.
//! 2. **Fast path**: a live [`LocalWindowCache`] entry admits (optimistically
//!    incrementing the local count) or denies without a store round trip.
//!    Admissions are written through to the store on a detached task.
//! 3. **Slow path**: the store's atomic
//!    [`conditional_increment`](CounterStore::conditional_increment) decides;
//!    a miss falls back to read-then-deny or reset-and-admit. Within one
//!    process only one slow path per key runs at a time; the others wait and
//!    then retry the freshly seeded cache.
//! 4. **Fail open**: any store error or timeout on the slow path admits the
//!    request and logs the cause.
//!
//! # Consistency bound
//!
//! Once an instance has seeded its cache from the store it can admit up to
//! `max` requests per window from the cache alone. With several instances
//! serving the same subject, the aggregate admitted count can therefore exceed
//! `max` inside a window until the next slow-path hit or write-through
//! reconciles the cache. The store is eventually authoritative, not
//! instantaneously authoritative. Tightening this with distributed locks would
//! reintroduce the round trip the cache exists to avoid.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::{CacheEntry, FastPath, LocalWindowCache};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::ConfigError;
use crate::policy::{PolicyTable, RoutePolicy};
use crate::store::{CounterStore, ResetOutcome};
use crate::subject::composite_key;
use crate::task::PeriodicTask;
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TelemetrySink};

pub use crate::telemetry::AdmissionPath;

/// Upper bound on increment/read/reset rounds before the slow path gives up.
const SLOW_PATH_ATTEMPTS: usize = 3;

/// The decision returned for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Admissions left in the window, when the deciding tier knows it.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: Option<u32>,
        path: AdmissionPath,
    },
    /// The request must be rejected.
    Denied {
        /// Seconds until the window ends; never more than the route's window.
        /// Useful for `Retry-After` headers.
        retry_after_secs: u64,
        path: AdmissionPath,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Denied { retry_after_secs, .. } => Some(*retry_after_secs),
            Decision::Allowed { .. } => None,
        }
    }

    pub fn path(&self) -> AdmissionPath {
        match self {
            Decision::Allowed { path, .. } | Decision::Denied { path, .. } => *path,
        }
    }

    fn allowed(path: AdmissionPath, remaining: Option<u32>) -> Self {
        Decision::Allowed { remaining, path }
    }

    fn denied(path: AdmissionPath, retry_after_secs: u64) -> Self {
        Decision::Denied { retry_after_secs, path }
    }
}

/// Core admission interface consumed by request handlers and the middleware.
///
/// Checks are infallible: internal faults degrade to "allowed".
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_rate_limit(&self, subject_id: &str, route: &str) -> Decision;
}

/// Why the slow path could not decide.
#[derive(Debug, thiserror::Error)]
enum SlowPathError {
    #[error("store error: {0}")]
    Store(String),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("gave up after {0} contended attempts")]
    Contention(usize),
}

impl SlowPathError {
    fn store<E: std::error::Error>(err: E) -> Self {
        SlowPathError::Store(err.to_string())
    }
}

/// One gate per key currently on the slow path.
type InFlight = Arc<DashMap<String, Arc<AsyncMutex<()>>>>;

struct Inner<S, T> {
    store: Arc<S>,
    cache: LocalWindowCache,
    inflight: InFlight,
    policies: PolicyTable,
    clock: Arc<dyn Clock>,
    store_timeout: Option<Duration>,
    sweep_interval: Duration,
    sink: T,
    sweeper: Mutex<Option<PeriodicTask>>,
}

/// Two-tier fixed-window rate limiter.
///
/// Clones share the same cache, store handle, and sweep lifecycle.
pub struct AdmissionEngine<S, T = NullSink> {
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for AdmissionEngine<S, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S, T> std::fmt::Debug for AdmissionEngine<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("policies", &self.inner.policies)
            .field("cached_keys", &self.inner.cache.len())
            .field("store_timeout", &self.inner.store_timeout)
            .finish()
    }
}

/// Builder for [`AdmissionEngine`].
pub struct AdmissionEngineBuilder<S, T = NullSink> {
    store: S,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    sink: T,
}

impl<S> AdmissionEngineBuilder<S, NullSink>
where
    S: CounterStore + 'static,
{
    pub fn new(store: S) -> Self {
        Self { store, config: LimiterConfig::default(), clock: Arc::new(SystemClock), sink: NullSink }
    }
}

impl<S, T> AdmissionEngineBuilder<S, T>
where
    S: CounterStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Route decision events to `sink`.
    pub fn sink<T2>(self, sink: T2) -> AdmissionEngineBuilder<S, T2>
    where
        T2: TelemetrySink,
        T2::Future: Send + 'static,
    {
        AdmissionEngineBuilder { store: self.store, config: self.config, clock: self.clock, sink }
    }

    /// Validate the config and build the engine. The cache sweep is not
    /// started; call [`AdmissionEngine::start`].
    pub fn build(self) -> Result<AdmissionEngine<S, T>, ConfigError> {
        self.config.validate()?;
        Ok(AdmissionEngine {
            inner: Arc::new(Inner {
                store: Arc::new(self.store),
                cache: LocalWindowCache::new(self.config.cache_ttl()),
                inflight: Arc::new(DashMap::new()),
                policies: self.config.policy_table(),
                clock: self.clock,
                store_timeout: self.config.store_timeout(),
                sweep_interval: self.config.cache_sweep_interval(),
                sink: self.sink,
                sweeper: Mutex::new(None),
            }),
        })
    }
}

impl<S> AdmissionEngine<S, NullSink>
where
    S: CounterStore + 'static,
{
    pub fn builder(store: S) -> AdmissionEngineBuilder<S, NullSink> {
        AdmissionEngineBuilder::new(store)
    }
}

impl<S, T> AdmissionEngine<S, T>
where
    S: CounterStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Decide whether `subject_id` may call `route` now.
    pub async fn check(&self, subject_id: &str, route: &str) -> Decision {
        let inner = &self.inner;
        if inner.policies.is_disabled() {
            return Decision::allowed(AdmissionPath::Disabled, None);
        }

        let key = composite_key(subject_id, route);
        let policy = inner.policies.policy_for(route);
        let now = inner.clock.now_millis();

        let decision = match inner.cache.try_admit(&key, policy.max, now) {
            FastPath::Admitted(entry) => {
                self.spawn_write_through(key.clone(), policy.max, now, entry.window_end);
                Decision::allowed(AdmissionPath::Fast, Some(policy.max.saturating_sub(entry.count)))
            }
            FastPath::Saturated(entry) => {
                Decision::denied(AdmissionPath::Fast, retry_after_secs(entry.window_end, now, policy))
            }
            FastPath::Miss => {
                let outcome = self.guarded_slow_path(&key, policy, now).await;
                match outcome {
                    Ok(decision) => decision,
                    Err(cause) => {
                        tracing::warn!(
                            target: "tollgate::engine",
                            key = %key,
                            route,
                            error = %cause,
                            "slow path failed; allowing request"
                        );
                        self.emit(LimiterEvent::FailedOpen { key, cause: cause.to_string() }).await;
                        return Decision::allowed(AdmissionPath::FailOpen, None);
                    }
                }
            }
        };

        match decision {
            Decision::Allowed { path, .. } => {
                tracing::debug!(target: "tollgate::engine", key = %key, %path, "admitted");
                self.emit(LimiterEvent::Admitted { key, path }).await;
            }
            Decision::Denied { retry_after_secs, path } => {
                tracing::debug!(target: "tollgate::engine", key = %key, %path, retry_after_secs, "denied");
                self.emit(LimiterEvent::Denied { key, retry_after_secs, path }).await;
            }
        }
        decision
    }

    /// Start the periodic cache sweep. Calling it again while running is a no-op.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.inner.sweeper.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let cache = self.inner.cache.clone();
        let inflight = self.inner.inflight.clone();
        let clock = self.inner.clock.clone();
        let sink = self.inner.sink.clone();
        *slot = Some(PeriodicTask::spawn("cache_sweep", self.inner.sweep_interval, move || {
            prune_idle_gates(&inflight);
            let removed = cache.evict_expired_and_stale(clock.now_millis());
            let remaining = cache.len();
            let sink = sink.clone();
            async move {
                if removed > 0 {
                    emit_best_effort(sink, LimiterEvent::CacheSwept { removed, remaining }).await;
                }
            }
        }));
    }

    /// Stop the cache sweep and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.inner.sweeper.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run one cache sweep now; returns the number of evicted entries.
    pub fn evict_cache(&self) -> usize {
        prune_idle_gates(&self.inner.inflight);
        self.inner.cache.evict_expired_and_stale(self.inner.clock.now_millis())
    }

    pub fn cache(&self) -> &LocalWindowCache {
        &self.inner.cache
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.inner.policies
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    async fn guarded_slow_path(
        &self,
        key: &str,
        policy: RoutePolicy,
        now: u64,
    ) -> Result<Decision, SlowPathError> {
        match self.inner.store_timeout {
            Some(limit) => tokio::time::timeout(limit, self.single_flight(key, policy, now))
                .await
                .unwrap_or(Err(SlowPathError::Timeout(limit))),
            None => self.single_flight(key, policy, now).await,
        }
    }

    /// At most one slow path per key runs in this process. Checks that queued
    /// behind it retry the cache the leader seeded before touching the store.
    async fn single_flight(&self, key: &str, policy: RoutePolicy, now: u64) -> Result<Decision, SlowPathError> {
        let gate = self.inner.inflight.entry(key.to_string()).or_default().clone();
        let outcome = {
            let _turn = gate.lock().await;
            match self.inner.cache.try_admit(key, policy.max, now) {
                FastPath::Admitted(entry) => {
                    self.spawn_write_through(key.to_string(), policy.max, now, entry.window_end);
                    Ok(Decision::allowed(AdmissionPath::Fast, Some(policy.max.saturating_sub(entry.count))))
                }
                FastPath::Saturated(entry) => {
                    Ok(Decision::denied(AdmissionPath::Fast, retry_after_secs(entry.window_end, now, policy)))
                }
                FastPath::Miss => self.slow_path(key, policy, now).await,
            }
        };
        drop(gate);
        // Gates left behind by cancelled checks are pruned by the cache sweep.
        self.inner.inflight.remove_if(key, |_, gate| Arc::strong_count(gate) == 1);
        outcome
    }

    async fn slow_path(&self, key: &str, policy: RoutePolicy, now: u64) -> Result<Decision, SlowPathError> {
        let store = &self.inner.store;
        let cache = &self.inner.cache;

        for attempt in 1..=SLOW_PATH_ATTEMPTS {
            if store.conditional_increment(key, policy.max, now).await.map_err(SlowPathError::store)? {
                let remaining = match store.read_record(key).await.map_err(SlowPathError::store)? {
                    Some(record) => {
                        cache.put(key, CacheEntry::from_record(&record, now));
                        Some(policy.max.saturating_sub(record.count))
                    }
                    // Purged between the increment and the read.
                    None => None,
                };
                return Ok(Decision::allowed(AdmissionPath::Slow, remaining));
            }

            match store.read_record(key).await.map_err(SlowPathError::store)? {
                Some(record) if record.is_live(now) => {
                    if record.is_saturated(policy.max) {
                        cache.put(key, CacheEntry::from_record(&record, now));
                        return Ok(Decision::denied(
                            AdmissionPath::Slow,
                            retry_after_secs(record.window_end, now, policy),
                        ));
                    }
                    tracing::debug!(target: "tollgate::engine", key, attempt, "window replaced mid-check; retrying");
                }
                _ => {
                    let window_end = now.saturating_add(policy.window_millis());
                    match store.upsert_reset(key, window_end, now).await.map_err(SlowPathError::store)? {
                        ResetOutcome::Applied(record) => {
                            cache.put(key, CacheEntry::from_record(&record, now));
                            return Ok(Decision::allowed(
                                AdmissionPath::Reset,
                                Some(policy.max.saturating_sub(record.count)),
                            ));
                        }
                        ResetOutcome::Lost(_) => {
                            tracing::debug!(target: "tollgate::engine", key, attempt, "lost reset race; retrying");
                        }
                    }
                }
            }
        }
        Err(SlowPathError::Contention(SLOW_PATH_ATTEMPTS))
    }

    /// Fire-and-forget: push a fast-path admission to the store.
    ///
    /// Uses the store's atomic increment so admissions made by other instances
    /// are never overwritten. When the store refuses (saturated elsewhere, or
    /// the window was replaced), the local entry is refreshed from the store.
    fn spawn_write_through(&self, key: String, max: u32, now: u64, window_end: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(target: "tollgate::engine", key = %key, "no tokio runtime; write-through skipped");
            return;
        };
        let store = self.inner.store.clone();
        let cache = self.inner.cache.clone();
        let clock = self.inner.clock.clone();
        let sink = self.inner.sink.clone();

        runtime.spawn(async move {
            if clock.now_millis() >= window_end {
                tracing::debug!(target: "tollgate::engine", key = %key, "window ended before write-through ran; dropped");
                return;
            }
            let applied = store.conditional_increment(&key, max, now).await;
            let refused = match applied {
                Ok(true) => return,
                Ok(false) => store.read_record(&key).await,
                Err(e) => return write_through_failed(sink, key, e.to_string()).await,
            };
            let refreshed_at = clock.now_millis();
            match refused {
                Ok(Some(record)) if record.is_live(refreshed_at) => {
                    tracing::debug!(
                        target: "tollgate::engine",
                        key = %key,
                        store_count = record.count,
                        "write-through refused; cache refreshed from store"
                    );
                    cache.put(key, CacheEntry::from_record(&record, refreshed_at));
                }
                Ok(_) => cache.remove(&key),
                Err(e) => write_through_failed(sink, key, e.to_string()).await,
            }
        });
    }

    async fn emit(&self, event: LimiterEvent) {
        emit_best_effort(self.inner.sink.clone(), event).await;
    }
}

fn prune_idle_gates(inflight: &InFlight) {
    inflight.retain(|_, gate| Arc::strong_count(gate) > 1);
}

async fn write_through_failed<T>(sink: T, key: String, cause: String)
where
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    tracing::warn!(target: "tollgate::engine", key = %key, error = %cause, "write-through failed");
    emit_best_effort(sink, LimiterEvent::WriteThroughFailed { key, cause }).await;
}

#[async_trait]
impl<S, T> RateLimiter for AdmissionEngine<S, T>
where
    S: CounterStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    async fn check_rate_limit(&self, subject_id: &str, route: &str) -> Decision {
        self.check(subject_id, route).await
    }
}

/// Whole seconds until `window_end`, rounded up, within `1..=window`.
fn retry_after_secs(window_end: u64, now: u64, policy: RoutePolicy) -> u64 {
    let remaining_ms = window_end.saturating_sub(now);
    let secs = remaining_ms / 1_000 + u64::from(remaining_ms % 1_000 != 0);
    secs.clamp(1, policy.window.max(1))
}
