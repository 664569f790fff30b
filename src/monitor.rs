//! Query/response correlation and process orchestration.
//!
//! [`Monitor::ingest`] is the single entry point for decoded traffic:
//! queries are recorded, responses resolve the pending query for the same
//! question. [`run`] wires capture, decoding, ingest and the sweeper
//! together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureClock, Packet, PacketMeta, PacketSource, PcapSource};
use crate::config::{CaptureTarget, MonitorConfig};
use crate::dns::DnsMessage;
use crate::event::{EventSink, LogSink, MonitorEvent, Resolution};
use crate::key::QueryKey;
use crate::stats::Stats;
use crate::store::CorrelationStore;
use crate::sweep::Sweeper;

/// Correlates decoded DNS messages against the pending query store.
pub struct Monitor {
    store: Arc<CorrelationStore>,
    sink: Arc<dyn EventSink>,
    stats: Arc<Stats>,
}

impl Monitor {
    pub fn new(store: Arc<CorrelationStore>, sink: Arc<dyn EventSink>, stats: Arc<Stats>) -> Self {
        Self { store, sink, stats }
    }

    /// Handle one decoded message, timestamped now.
    pub fn ingest(&self, meta: &PacketMeta, msg: &DnsMessage) {
        self.ingest_at(meta, msg, Instant::now());
    }

    /// Handle one decoded message observed at `now`.
    pub fn ingest_at(&self, meta: &PacketMeta, msg: &DnsMessage, now: Instant) {
        let question = &msg.question;
        let key = QueryKey::derive(&question.name, question.qtype.to_u16());

        if !msg.is_response() {
            let displaced = self.store.record_query(key, question.to_string(), now);
            if let Some(old) = &displaced {
                debug!("{} replaced pending query {}", meta, old.description);
            }
            self.stats.record_query(displaced.is_some());
            return;
        }

        let Some(pending) = self.store.try_resolve(key) else {
            debug!("{meta} response for {question} matches no pending query");
            self.stats.record_response(false);
            return;
        };
        self.stats.record_response(true);

        self.sink.emit(MonitorEvent::Resolved(Resolution {
            description: pending.description,
            rcode: msg.rcode(),
            source: meta.src,
            latency: now.saturating_duration_since(pending.recorded_at),
        }));
    }

    /// Decode and ingest packets until the channel closes.
    ///
    /// Each packet is timestamped with its capture time. Payloads that fail
    /// to decode are logged and skipped.
    pub async fn consume(&self, rx: mpsc::Receiver<Packet>) {
        self.pump(rx, |_| {}).await;
    }

    /// Consume a replayed capture, sweeping on capture time.
    ///
    /// A sweep runs whenever capture time has moved on by the sweep
    /// interval, as it would have live. At the end of the capture every
    /// remaining entry is checked once more as of the last packet.
    pub async fn replay(&self, rx: mpsc::Receiver<Packet>, sweeper: &Sweeper) {
        let interval = sweeper.config().interval;
        let mut next_sweep: Option<Instant> = None;
        let last = self
            .pump(rx, |now| {
                let due = *next_sweep.get_or_insert(now + interval);
                if now >= due {
                    sweeper.sweep_at(now);
                    next_sweep = Some(now + interval);
                }
            })
            .await;

        if let Some(end) = last {
            let stale = sweeper.drain_at(end);
            debug!("end of replay: {stale} stale, {} pending", self.pending());
        }
    }

    /// Returns the capture time of the last packet seen.
    async fn pump(
        &self,
        mut rx: mpsc::Receiver<Packet>,
        mut before_ingest: impl FnMut(Instant),
    ) -> Option<Instant> {
        let mut clock = CaptureClock::new();
        let mut last = None;
        while let Some(packet) = rx.recv().await {
            let now = clock.instant_for(packet.meta.captured_at);
            before_ingest(now);
            last = Some(now);
            match DnsMessage::parse(&packet.payload) {
                Ok(msg) => self.ingest_at(&packet.meta, &msg, now),
                Err(e) => {
                    debug!("{} invalid dns packet: {e}", packet.meta);
                    self.stats.record_decode_failure();
                }
            }
        }
        last
    }

    pub fn pending(&self) -> usize {
        self.store.len()
    }
}

/// Run the monitor until interrupted or the capture source is exhausted.
pub async fn run(config: MonitorConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let (mut source, replay) = match &config.target {
        CaptureTarget::Interface { name, promisc } => (PcapSource::live(name, *promisc)?, false),
        CaptureTarget::File(path) => (PcapSource::offline(path)?, true),
    };
    serve(&mut source, &config, replay, Arc::new(LogSink), tokio::signal::ctrl_c()).await
}

/// Drive `source` until it runs dry or `interrupt` completes.
///
/// Capture and sweeping are always stopped before returning, whether the
/// interrupt fired or failed.
async fn serve<S, F>(
    source: &mut S,
    config: &MonitorConfig,
    replay: bool,
    sink: Arc<dyn EventSink>,
    interrupt: F,
) -> Result<()>
where
    S: PacketSource,
    F: Future<Output = std::io::Result<()>>,
{
    let rx = source.start(&config.filter)?;

    let store = Arc::new(CorrelationStore::new());
    let stats = Arc::new(Stats::new());
    let monitor = Monitor::new(Arc::clone(&store), Arc::clone(&sink), Arc::clone(&stats));
    let sweeper = Sweeper::new(Arc::clone(&store), config.sweep.clone(), sink, Arc::clone(&stats));

    let cancel = CancellationToken::new();
    let sweep_task = (!replay).then(|| tokio::spawn(sweeper.clone().run(cancel.clone())));
    if let Some(period) = config.stats_interval.filter(|p| !p.is_zero()) {
        tokio::spawn(report_stats(
            period,
            Arc::clone(&stats),
            Arc::clone(&store),
            cancel.clone(),
        ));
    }

    info!(
        "Monitoring DNS: sweep every {:?}, stale after {:?}, at most {} per sweep",
        config.sweep.interval, config.sweep.stale_after, config.sweep.max_inspect
    );

    let capture = async {
        if replay {
            monitor.replay(rx, &sweeper).await;
        } else {
            monitor.consume(rx).await;
        }
    };
    let outcome = tokio::select! {
        () = capture => {
            info!("Capture source exhausted");
            Ok(())
        }
        signal = interrupt => {
            if signal.is_ok() {
                info!("Interrupt received, shutting down");
            }
            signal.context("waiting for interrupt")
        }
    };

    cancel.cancel();
    source.stop();
    if let Some(task) = sweep_task
        && let Err(e) = task.await
    {
        debug!("sweep task ended abnormally: {e}");
    }

    log_stats(&stats, &store);
    info!("Discarding {} pending queries", monitor.pending());
    outcome
}

async fn report_stats(
    period: Duration,
    stats: Arc<Stats>,
    store: Arc<CorrelationStore>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => log_stats(&stats, &store),
        }
    }
}

fn log_stats(stats: &Stats, store: &CorrelationStore) {
    let snap = stats.snapshot_and_reset();
    info!(
        "[stats] pending={} queries={} responses={} resolved={} unmatched={} overwritten={} stale={} decode_failures={}",
        store.len(),
        snap.queries,
        snap.responses,
        snap.resolved,
        snap.unmatched,
        snap.overwritten,
        snap.stale,
        snap.decode_failures
    );
}
