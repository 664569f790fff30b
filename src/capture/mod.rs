//! Packet capture for DNS traffic.
//!
//! Captures UDP datagrams on port 53 from a live interface or a capture
//! file and hands them to the monitor as [`Packet`]s over a channel.

mod link;
mod source;

pub use link::{LinkType, UdpDatagram, demux};
pub use source::{PcapSource, list_interfaces, select_default_interface};

use std::fmt;
use std::net::IpAddr;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use tokio::sync::mpsc;

/// BPF expression selecting plain DNS traffic.
pub const DEFAULT_FILTER: &str = "udp and port 53";

/// Largest frame captured.
pub const SNAPLEN: i32 = 4096;

/// Direction of a packet relative to the capturing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Inbound,
    Outbound,
    #[default]
    Unknown,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
            Direction::Unknown => "unknown",
        }
    }
}

/// Addressing and timing of a captured datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub direction: Direction,
    pub captured_at: SystemTime,
}

impl fmt::Display for PacketMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.direction.as_str(),
            self.src,
            self.src_port,
            self.dst,
            self.dst_port
        )
    }
}

/// A captured UDP datagram.
#[derive(Debug, Clone)]
pub struct Packet {
    pub meta: PacketMeta,
    pub payload: Bytes,
}

/// A producer of captured packets.
///
/// Capture runs independently of the consumer; stopping it closes the
/// channel returned by `start`.
pub trait PacketSource {
    fn start(&mut self, filter: &str) -> anyhow::Result<mpsc::Receiver<Packet>>;
    fn stop(&self);
}

/// Maps capture timestamps onto the monotonic clock.
///
/// The first timestamp seen is pinned to the current instant; later ones
/// keep their offset from it. Ages and latencies are then measured in
/// capture time, which for a replayed file can run far ahead of the wall
/// clock.
#[derive(Debug, Default)]
pub struct CaptureClock {
    anchor: Option<(SystemTime, Instant)>,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instant_for(&mut self, captured_at: SystemTime) -> Instant {
        let (wall, mono) = *self
            .anchor
            .get_or_insert_with(|| (captured_at, tokio::time::Instant::now().into_std()));
        match captured_at.duration_since(wall) {
            Ok(ahead) => mono + ahead,
            Err(behind) => mono.checked_sub(behind.duration()).unwrap_or(mono),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn capture_offsets_are_preserved() {
        let mut clock = CaptureClock::new();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let first = clock.instant_for(base);
        let later = clock.instant_for(base + Duration::from_secs(60));
        let reordered = clock.instant_for(base - Duration::from_millis(250));

        assert_eq!(later - first, Duration::from_secs(60));
        assert_eq!(first - reordered, Duration::from_millis(250));
    }
}
