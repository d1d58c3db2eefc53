//! Persistent counter store: the cross-instance source of truth.
//!
//! The engine needs exactly four operations from a durable backend. The one
//! that carries cross-instance correctness is
//! [`conditional_increment`](CounterStore::conditional_increment): it must be a
//! single atomic statement on the backend, never a read-then-write from the
//! caller. For a SQL table that is
//!
//! ```sql
//! UPDATE rate_limits
//!    SET count = count + 1, last_request_at = $now
//!  WHERE key = $key AND count < $max AND window_end > $now
//! ```
//!
//! with "rows affected = 1" as the result. [`upsert_reset`](CounterStore::upsert_reset)
//! is the matching insert-if-absent / reset-if-expired statement.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Authoritative per-key window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    /// Composite `subject:route` key.
    pub key: String,
    /// Requests admitted in the current window.
    pub count: u32,
    /// Unix millis; the window is live while `now < window_end`.
    pub window_end: u64,
    /// Unix millis of the most recent admitted request (diagnostic only).
    pub last_request_at: u64,
}

impl WindowRecord {
    pub fn is_live(&self, now: u64) -> bool {
        now < self.window_end
    }

    pub fn is_saturated(&self, max: u32) -> bool {
        self.count >= max
    }
}

/// Result of [`CounterStore::upsert_reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// This call created or reset the row; it owns the window's first admission.
    Applied(WindowRecord),
    /// A concurrent caller already installed a live window; nothing was written.
    Lost(WindowRecord),
}

impl ResetOutcome {
    pub fn record(&self) -> &WindowRecord {
        match self {
            ResetOutcome::Applied(r) | ResetOutcome::Lost(r) => r,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ResetOutcome::Applied(_))
    }
}

/// Abstract storage interface for window counters.
///
/// Every operation must be safe under concurrent multi-process access;
/// `conditional_increment` and `upsert_reset` must each be atomic.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Atomically increment `count` and set `last_request_at` only if the row
    /// exists with `count < max` and `window_end > now`.
    ///
    /// Returns `Ok(true)` if the row qualified and was updated.
    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error>;

    /// Fetch the current record for a key.
    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error>;

    /// Create the row with `count = 1`, or reset an expired row to `count = 1`
    /// and the given `window_end`. A live row is left untouched.
    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error>;

    /// Delete rows whose `window_end` is before `cutoff`; returns rows deleted.
    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    type Error = S::Error;

    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error> {
        (**self).conditional_increment(key, max, now).await
    }

    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        (**self).read_record(key).await
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        (**self).upsert_reset(key, window_end, now).await
    }

    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error> {
        (**self).delete_older_than(cutoff).await
    }
}

/// In-memory counter store.
///
/// Every operation runs under one mutex, which gives the same per-statement
/// atomicity a SQL backend provides. Clones share the same rows, so several
/// engines (standing in for separate processes) can point at one store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryCounterStore {
    rows: Arc<Mutex<HashMap<String, WindowRecord>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted rows.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Synchronous snapshot of one row, for inspection.
    pub fn get(&self, key: &str) -> Option<WindowRecord> {
        self.rows().get(key).cloned()
    }

    /// Overwrite a row directly, bypassing the conditional operations.
    pub fn insert(&self, record: WindowRecord) {
        self.rows().insert(record.key.clone(), record);
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, WindowRecord>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    type Error = std::convert::Infallible;

    async fn conditional_increment(&self, key: &str, max: u32, now: u64) -> Result<bool, Self::Error> {
        let mut rows = self.rows();
        match rows.get_mut(key) {
            Some(row) if row.count < max && row.window_end > now => {
                row.count += 1;
                row.last_request_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read_record(&self, key: &str) -> Result<Option<WindowRecord>, Self::Error> {
        Ok(self.rows().get(key).cloned())
    }

    async fn upsert_reset(&self, key: &str, window_end: u64, now: u64) -> Result<ResetOutcome, Self::Error> {
        let mut rows = self.rows();
        if let Some(current) = rows.get(key) {
            if current.is_live(now) {
                tracing::trace!(target: "tollgate::store", key, window_end = current.window_end, "reset refused: window still live");
                return Ok(ResetOutcome::Lost(current.clone()));
            }
        }
        let record = WindowRecord { key: key.to_string(), count: 1, window_end, last_request_at: now };
        rows.insert(key.to_string(), record.clone());
        Ok(ResetOutcome::Applied(record))
    }

    async fn delete_older_than(&self, cutoff: u64) -> Result<u64, Self::Error> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|_, row| row.window_end >= cutoff);
        let deleted = (before - rows.len()) as u64;
        tracing::debug!(target: "tollgate::store", cutoff, deleted, remaining = rows.len(), "deleted expired rows");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_increment_requires_live_unsaturated_row() {
        let store = InMemoryCounterStore::new();
        assert!(!store.conditional_increment("k", 2, 0).await.unwrap(), "absent row never qualifies");

        let reset = store.upsert_reset("k", 60_000, 0).await.unwrap();
        assert!(reset.is_applied());
        assert_eq!(reset.record().count, 1);

        assert!(store.conditional_increment("k", 2, 1_000).await.unwrap());
        assert_eq!(store.get("k").unwrap().count, 2);
        assert_eq!(store.get("k").unwrap().last_request_at, 1_000);

        assert!(!store.conditional_increment("k", 2, 2_000).await.unwrap(), "saturated");
        assert!(!store.conditional_increment("k", 5, 60_000).await.unwrap(), "expired");
        assert_eq!(store.get("k").unwrap().count, 2);
    }

    #[tokio::test]
    async fn upsert_reset_only_replaces_expired_rows() {
        let store = InMemoryCounterStore::new();
        store.upsert_reset("k", 60_000, 0).await.unwrap();
        store.conditional_increment("k", 10, 1_000).await.unwrap();

        let lost = store.upsert_reset("k", 61_000, 1_000).await.unwrap();
        assert_eq!(lost, ResetOutcome::Lost(store.get("k").unwrap()));
        assert_eq!(lost.record().count, 2);

        let applied = store.upsert_reset("k", 121_000, 61_000).await.unwrap();
        assert!(applied.is_applied());
        assert_eq!(applied.record().count, 1);
        assert_eq!(applied.record().window_end, 121_000);
    }

    #[tokio::test]
    async fn delete_older_than_counts_removed_rows() {
        let store = InMemoryCounterStore::new();
        store.upsert_reset("old", 1_000, 0).await.unwrap();
        store.upsert_reset("edge", 5_000, 0).await.unwrap();
        store.upsert_reset("new", 9_000, 0).await.unwrap();

        assert_eq!(store.delete_older_than(5_000).await.unwrap(), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("edge").is_some());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn arc_forwarding() {
        let store = Arc::new(InMemoryCounterStore::new());
        CounterStore::upsert_reset(&store, "k", 10, 0).await.unwrap();
        assert_eq!(CounterStore::read_record(&store, "k").await.unwrap().map(|r| r.count), Some(1));
    }
}
