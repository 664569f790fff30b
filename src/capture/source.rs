//! libpcap-backed packet source.

use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use log::{debug, error, info};
use pcap::{Activated, Capture, Device, Error};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::link::{LinkType, demux};
use super::{Direction, Packet, PacketMeta, PacketSource, SNAPLEN};

/// Read timeout so the capture loop notices `stop` on a quiet interface.
const READ_TIMEOUT_MS: i32 = 100;
const CHANNEL_CAPACITY: usize = 10000;

pub fn list_interfaces() -> Result<Vec<Device>> {
    Ok(Device::list()?)
}

/// Pick the first interface that is up, running and not loopback.
pub fn select_default_interface() -> Result<String> {
    let devices = Device::list()?;

    for device in &devices {
        if device.name == "any" {
            continue;
        }
        if !device.flags.is_loopback() && device.flags.is_up() && device.flags.is_running() {
            return Ok(device.name.clone());
        }
    }

    for device in &devices {
        if device.name != "any" && device.flags.is_up() {
            return Ok(device.name.clone());
        }
    }

    bail!("No suitable network interface found")
}

/// Captures from a live interface or replays a capture file.
pub struct PcapSource {
    capture: Option<Capture<dyn Activated>>,
    /// Addresses of the capturing interface, used to tell direction.
    local_addrs: Vec<IpAddr>,
    cancel: CancellationToken,
}

impl PcapSource {
    /// Open a live capture on `interface`.
    ///
    /// Fails if the interface does not exist or cannot be opened, e.g. for
    /// lack of capture permissions.
    pub fn live(interface: &str, promisc: bool) -> Result<Self> {
        let device = Device::list()
            .context("listing capture devices")?
            .into_iter()
            .find(|d| d.name == interface)
            .with_context(|| format!("Interface {interface} not found"))?;
        let local_addrs = device.addresses.iter().map(|a| a.addr).collect();

        let capture = Capture::from_device(device)?
            .promisc(promisc)
            .snaplen(SNAPLEN)
            .immediate_mode(true)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .with_context(|| format!("opening capture on {interface}"))?;

        info!("Opened capture on interface: {interface}");
        Ok(Self {
            capture: Some(capture.into()),
            local_addrs,
            cancel: CancellationToken::new(),
        })
    }

    /// Open a capture file for replay. Direction is always unknown.
    pub fn offline(path: &Path) -> Result<Self> {
        let capture = Capture::from_file(path)
            .with_context(|| format!("opening capture file {}", path.display()))?;

        info!("Opened capture file: {}", path.display());
        Ok(Self {
            capture: Some(capture.into()),
            local_addrs: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }
}

impl PacketSource for PcapSource {
    fn start(&mut self, filter: &str) -> Result<mpsc::Receiver<Packet>> {
        let mut capture = self.capture.take().context("capture already started")?;
        capture
            .filter(filter, true)
            .with_context(|| format!("applying capture filter {filter:?}"))?;

        let dlt = capture.get_datalink().0;
        let link = LinkType::from_dlt(dlt).with_context(|| format!("unsupported link type {dlt}"))?;
        debug!("capture link type {link:?}, filter {filter:?}");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let local_addrs = self.local_addrs.clone();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || {
            read_packets(capture, link, &local_addrs, &tx, &cancel);
            info!("Packet capture task terminated");
        });

        Ok(rx)
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

fn read_packets(
    mut capture: Capture<dyn Activated>,
    link: LinkType,
    local_addrs: &[IpAddr],
    tx: &mpsc::Sender<Packet>,
    cancel: &CancellationToken,
) {
    while !cancel.is_cancelled() {
        let frame = match capture.next_packet() {
            Ok(frame) => frame,
            Err(e) => match read_failure(&e) {
                ReadFailure::Idle => continue,
                ReadFailure::Exhausted => {
                    info!("End of capture file reached");
                    break;
                }
                ReadFailure::Fatal => {
                    error!("Error reading packet, stopping capture: {e}");
                    break;
                }
            },
        };

        let Some(dgram) = demux(link, frame.data) else {
            continue;
        };

        let ts = frame.header.ts;
        let captured_at = SystemTime::UNIX_EPOCH
            + Duration::from_secs(u64::try_from(ts.tv_sec).unwrap_or(0))
            + Duration::from_micros(u64::try_from(ts.tv_usec).unwrap_or(0));

        let packet = Packet {
            meta: PacketMeta {
                src: dgram.src,
                dst: dgram.dst,
                src_port: dgram.src_port,
                dst_port: dgram.dst_port,
                direction: direction(local_addrs, dgram.src, dgram.dst),
                captured_at,
            },
            payload: Bytes::copy_from_slice(dgram.payload),
        };

        if tx.blocking_send(packet).is_err() {
            info!("Channel closed, stopping capture");
            break;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadFailure {
    /// Read timeout on a quiet interface.
    Idle,
    /// End of a capture file.
    Exhausted,
    /// Anything else, e.g. the interface went away.
    Fatal,
}

fn read_failure(err: &Error) -> ReadFailure {
    match err {
        Error::TimeoutExpired => ReadFailure::Idle,
        Error::NoMorePackets => ReadFailure::Exhausted,
        _ => ReadFailure::Fatal,
    }
}

fn direction(local_addrs: &[IpAddr], src: IpAddr, dst: IpAddr) -> Direction {
    if local_addrs.contains(&dst) {
        Direction::Inbound
    } else if local_addrs.contains(&src) {
        Direction::Outbound
    } else {
        Direction::Unknown
    }
}
