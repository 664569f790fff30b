//! Events emitted by the correlation engine.
//!
//! The engine never logs match or timeout outcomes directly; it hands them
//! to an [`EventSink`]. [`LogSink`] is what the binary uses.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::dns::Rcode;

/// A pending query matched by its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub description: String,
    pub rcode: Rcode,
    /// Address the response came from.
    pub source: IpAddr,
    pub latency: Duration,
}

/// A query evicted by a sweep without having seen a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleQuery {
    pub description: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Resolved(Resolution),
    Stale(StaleQuery),
}

/// Receiver of engine events.
///
/// Called outside the store lock, from both the ingest and the sweep path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

/// Writes every event through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Resolved(r) => info!(
                "{} got response {} from {} after {:.3}ms",
                r.description,
                r.rcode,
                r.source,
                r.latency.as_secs_f64() * 1000.0
            ),
            MonitorEvent::Stale(s) => warn!(
                "{} unanswered after {:.3}s",
                s.description,
                s.elapsed.as_secs_f64()
            ),
        }
    }
}

/// Forwards events into a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MonitorEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MonitorEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MonitorEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("event dropped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale(name: &str) -> MonitorEvent {
        MonitorEvent::Stale(StaleQuery {
            description: name.to_string(),
            elapsed: Duration::from_secs(6),
        })
    }

    #[test]
    fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelSink::channel(4);

        sink.emit(stale("a. IN A"));

        assert_eq!(rx.try_recv().unwrap(), stale("a. IN A"));
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::channel(1);

        sink.emit(stale("first. IN A"));
        sink.emit(stale("second. IN A"));

        assert_eq!(rx.try_recv().unwrap(), stale("first. IN A"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);

        sink.emit(stale("gone. IN A"));
    }

    #[test]
    fn log_sink_accepts_both_kinds() {
        LogSink.emit(stale("slow. IN A"));
        LogSink.emit(MonitorEvent::Resolved(Resolution {
            description: "fast. IN A".into(),
            rcode: Rcode::NoError,
            source: IpAddr::from([192, 0, 2, 53]),
            latency: Duration::from_millis(12),
        }));
    }
}
