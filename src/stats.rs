//! Counters for the monitor's periodic status line.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the ingest and sweep paths.
pub struct Stats {
    queries: AtomicU64,
    responses: AtomicU64,
    resolved: AtomicU64,
    /// Responses with no pending query to match.
    unmatched: AtomicU64,
    /// Pending queries replaced by a later query under the same key.
    overwritten: AtomicU64,
    stale: AtomicU64,
    decode_failures: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        }
    }

    pub fn record_query(&self, overwrote: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if overwrote {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_response(&self, matched: bool) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        let counter = if matched {
            &self.resolved
        } else {
            &self.unmatched
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self, count: u64) {
        self.stale.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.swap(0, Ordering::Relaxed),
            responses: self.responses.swap(0, Ordering::Relaxed),
            resolved: self.resolved.swap(0, Ordering::Relaxed),
            unmatched: self.unmatched.swap(0, Ordering::Relaxed),
            overwritten: self.overwritten.swap(0, Ordering::Relaxed),
            stale: self.stale.swap(0, Ordering::Relaxed),
            decode_failures: self.decode_failures.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub responses: u64,
    pub resolved: u64,
    pub unmatched: u64,
    pub overwritten: u64,
    pub stale: u64,
    pub decode_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = Stats::new();
        stats.record_query(false);
        stats.record_query(true);
        stats.record_response(true);
        stats.record_response(false);
        stats.record_response(false);
        stats.record_stale(3);
        stats.record_decode_failure();

        let snap = stats.snapshot_and_reset();

        assert_eq!(
            snap,
            StatsSnapshot {
                queries: 2,
                responses: 3,
                resolved: 1,
                unmatched: 2,
                overwritten: 1,
                stale: 3,
                decode_failures: 1,
            }
        );
    }

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record_query(false);

        stats.snapshot_and_reset();

        assert_eq!(stats.snapshot_and_reset(), StatsSnapshot::default());
    }
}
