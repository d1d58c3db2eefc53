//! Process-local window cache.
//!
//! A derivative, non-authoritative copy of recently seen window records. It
//! lets the engine admit or deny without a store round trip while a window is
//! live. The map is sharded and locked per shard, so concurrent requests on
//! the same key serialize on the entry and never corrupt it.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::store::WindowRecord;

/// Local copy of a window plus a staleness clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub count: u32,
    /// Unix millis.
    pub window_end: u64,
    /// Unix millis of the most recent admission seen by this process.
    pub last_request_at: u64,
    /// Unix millis of the last time this process read or wrote the entry.
    pub last_touched: u64,
}

impl CacheEntry {
    pub fn from_record(record: &WindowRecord, now: u64) -> Self {
        Self {
            count: record.count,
            window_end: record.window_end,
            last_request_at: record.last_request_at,
            last_touched: now,
        }
    }

    /// A live window always holds at least one admission; anything else is
    /// treated as absent.
    fn is_well_formed(&self) -> bool {
        self.count > 0 && self.window_end > 0
    }

    pub fn is_live(&self, now: u64) -> bool {
        self.is_well_formed() && now < self.window_end
    }
}

/// Outcome of a fast-path admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPath {
    /// No live entry; the caller must take the slow path.
    Miss,
    /// The cached count was incremented; carries the updated entry.
    Admitted(CacheEntry),
    /// The cached window is already at `max`.
    Saturated(CacheEntry),
}

/// Shared map from composite key to [`CacheEntry`].
///
/// Clones share the same entries.
#[derive(Debug, Clone)]
pub struct LocalWindowCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl_millis: u64,
}

impl LocalWindowCache {
    /// `ttl` is the nominal entry lifetime; untouched entries go after `2 * ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Live entry for `key`, if any.
    pub fn get(&self, key: &str, now: u64) -> Option<CacheEntry> {
        self.entries.get(key).filter(|e| e.is_live(now)).map(|e| e.clone())
    }

    /// Store `entry`, never lowering the count of the window already cached.
    ///
    /// Concurrent slow-path checks on one key may finish out of order; within
    /// a window the highest count seen wins.
    pub fn put(&self, key: impl Into<String>, entry: CacheEntry) {
        self.entries
            .entry(key.into())
            .and_modify(|current| {
                if current.window_end == entry.window_end && current.is_well_formed() {
                    current.count = current.count.max(entry.count);
                    current.last_request_at = current.last_request_at.max(entry.last_request_at);
                    current.last_touched = current.last_touched.max(entry.last_touched);
                } else {
                    *current = entry.clone();
                }
            })
            .or_insert_with(|| entry.clone());
    }

    /// Fast path: admit against the cached window if it is live.
    ///
    /// The check and the increment happen under the entry's shard lock.
    pub fn try_admit(&self, key: &str, max: u32, now: u64) -> FastPath {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return FastPath::Miss;
        };
        if !entry.is_live(now) {
            return FastPath::Miss;
        }
        entry.last_touched = now;
        if entry.count >= max {
            return FastPath::Saturated(entry.clone());
        }
        entry.count += 1;
        entry.last_request_at = now;
        FastPath::Admitted(entry.clone())
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop entries whose window has ended, that are malformed, or that have
    /// not been touched for twice the nominal lifetime. Returns how many went.
    pub fn evict_expired_and_stale(&self, now: u64) -> usize {
        let stale_after = self.ttl_millis.saturating_mul(2);
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.is_live(now) && now.saturating_sub(e.last_touched) <= stale_after);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(target: "tollgate::cache", removed, remaining = self.entries.len(), "evicted cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
