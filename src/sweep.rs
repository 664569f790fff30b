//! Periodic eviction of queries that never saw a response.
//!
//! Each sweep inspects at most `max_inspect` entries regardless of how large
//! the store has grown, so a burst of unanswered queries cannot make the
//! sweep slow or starve the ingest path of the lock. Entries are visited in
//! primary key order from a rotating cursor, not oldest first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event::{EventSink, MonitorEvent, StaleQuery};
use crate::stats::Stats;
use crate::store::CorrelationStore;

/// Shortest period [`Sweeper::run`] will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sweep timing and budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Age at which a pending query is reported and evicted.
    pub stale_after: Duration,
    /// Maximum number of entries inspected per sweep.
    pub max_inspect: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(5),
            max_inspect: 10,
        }
    }
}

#[derive(Clone)]
pub struct Sweeper {
    store: Arc<CorrelationStore>,
    config: SweepConfig,
    sink: Arc<dyn EventSink>,
    stats: Arc<Stats>,
}

impl Sweeper {
    pub fn new(
        store: Arc<CorrelationStore>,
        config: SweepConfig,
        sink: Arc<dyn EventSink>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            store,
            config,
            sink,
            stats,
        }
    }

    /// Run one sweep as of `now`, returning the queries reported stale.
    pub fn sweep_at(&self, now: Instant) -> Vec<StaleQuery> {
        let budget = self.config.max_inspect.min(self.store.len());
        if budget == 0 {
            return Vec::new();
        }

        let mut reported = Vec::new();
        for query in self.store.scan(budget) {
            let elapsed = now.saturating_duration_since(query.recorded_at);
            if elapsed < self.config.stale_after {
                continue;
            }
            // Lost the race with a response or a newer query.
            if !self.store.evict(&query) {
                continue;
            }
            let stale = StaleQuery {
                description: query.description,
                elapsed,
            };
            self.sink.emit(MonitorEvent::Stale(stale.clone()));
            reported.push(stale);
        }

        self.stats.record_stale(reported.len() as u64);
        debug!(
            "sweep inspected {budget} entries, evicted {}, {} pending",
            reported.len(),
            self.store.len()
        );
        reported
    }

    /// Sweep as of `now` until every entry present on entry has been
    /// inspected once, returning how many were reported.
    ///
    /// Used at the end of a replay, when no further sweeps will run.
    pub fn drain_at(&self, now: Instant) -> usize {
        if self.config.max_inspect == 0 {
            return 0;
        }
        let passes = self.store.len().div_ceil(self.config.max_inspect);
        (0..passes).map(|_| self.sweep_at(now).len()).sum()
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Sweep every `interval` until `cancel` fires.
    ///
    /// A zero interval is raised to one millisecond.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep_at(tokio::time::Instant::now().into_std());
                }
            }
        }
        debug!("sweeper stopped");
    }
}
