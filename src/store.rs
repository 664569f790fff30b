//! In-flight query tracking.
//!
//! The store maps a primary key to the single pending query recorded under
//! it. Every operation takes the lock once and releases it before returning,
//! so the ingest path and the sweep path never hold it across a decode, a log
//! call or an await.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::key::QueryKey;

/// An outbound query awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub key: QueryKey,
    /// Printable question, kept for reporting only.
    pub description: String,
    pub recorded_at: Instant,
}

struct Inner {
    pending: BTreeMap<u64, PendingQuery>,
    /// Next primary key `scan` starts from.
    cursor: u64,
}

/// Concurrency-safe map of pending queries keyed by primary key.
///
/// Entries are ordered by primary key, which is a well-mixed hash, so the
/// round-robin walk done by [`CorrelationStore::scan`] visits entries in an
/// order unrelated to when they were recorded.
pub struct CorrelationStore {
    inner: Mutex<Inner>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: BTreeMap::new(),
                cursor: 0,
            }),
        }
    }

    /// Record an outbound query.
    ///
    /// Any entry already stored under the same primary key is replaced and
    /// handed back to the caller.
    pub fn record_query(
        &self,
        key: QueryKey,
        description: String,
        now: Instant,
    ) -> Option<PendingQuery> {
        let query = PendingQuery {
            key,
            description,
            recorded_at: now,
        };
        self.lock().pending.insert(key.primary, query)
    }

    /// Consume the pending query matching both keys.
    ///
    /// A primary key hit whose conflict key differs belongs to another
    /// question; it is left in place and `None` is returned.
    pub fn try_resolve(&self, key: QueryKey) -> Option<PendingQuery> {
        let mut inner = self.lock();
        let matched = inner
            .pending
            .get(&key.primary)
            .is_some_and(|query| query.key.conflict == key.conflict);
        if matched {
            inner.pending.remove(&key.primary)
        } else {
            None
        }
    }

    /// Snapshot up to `limit` entries without removing them.
    ///
    /// Successive calls continue where the previous one stopped and wrap
    /// around the key space, so an unchanged store of `n` entries is fully
    /// covered after `ceil(n / limit)` scans.
    pub fn scan(&self, limit: usize) -> Vec<PendingQuery> {
        let mut inner = self.lock();
        let limit = limit.min(inner.pending.len());
        if limit == 0 {
            return Vec::new();
        }

        let cursor = inner.cursor;
        let batch: Vec<PendingQuery> = inner
            .pending
            .range(cursor..)
            .chain(inner.pending.range(..cursor))
            .take(limit)
            .map(|(_, query)| query.clone())
            .collect();

        if let Some(last) = batch.last() {
            inner.cursor = last.key.primary.wrapping_add(1);
        }
        batch
    }

    /// Remove a previously scanned entry.
    ///
    /// Only removes the entry if it is still the one that was scanned; a
    /// query recorded under the same primary key in the meantime survives.
    pub fn evict(&self, scanned: &PendingQuery) -> bool {
        let mut inner = self.lock();
        let unchanged = inner.pending.get(&scanned.key.primary).is_some_and(|current| {
            current.key.conflict == scanned.key.conflict
                && current.recorded_at == scanned.recorded_at
        });
        if unchanged {
            inner.pending.remove(&scanned.key.primary);
        }
        unchanged
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are plain data, a panic elsewhere cannot leave them torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}
