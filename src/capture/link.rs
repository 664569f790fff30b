//! Link, IP and UDP layer demultiplexing.
//!
//! References:
//! - RFC 894: Ethernet Frame Format, IEEE 802.1Q for VLAN tags
//! - RFC 791: Internet Protocol (IPv4)
//! - RFC 8200: Internet Protocol Version 6 (IPv6)
//! - RFC 768: User Datagram Protocol (UDP)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const PROTO_UDP: u8 = 17;

/// Link-layer framing of a capture, from its pcap DLT value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Linux cooked capture, used by the `any` device.
    LinuxSll,
    /// BSD loopback: 4-byte address family header.
    Loopback,
    /// Bare IPv4 or IPv6 packets.
    Raw,
}

impl LinkType {
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            1 => Some(Self::Ethernet),
            113 => Some(Self::LinuxSll),
            0 | 108 => Some(Self::Loopback),
            12 | 14 | 101 | 228 | 229 => Some(Self::Raw),
            _ => None,
        }
    }
}

/// A UDP datagram borrowed from a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Strip link, IP and UDP headers from a frame.
///
/// Returns `None` for anything that is not a complete, unfragmented UDP
/// datagram over IPv4 or IPv6.
pub fn demux(link: LinkType, frame: &[u8]) -> Option<UdpDatagram<'_>> {
    let packet = match link {
        LinkType::Ethernet => {
            let mut ethertype = read_u16(frame, 12)?;
            let mut offset = 14;
            if ethertype == ETHERTYPE_VLAN {
                ethertype = read_u16(frame, 16)?;
                offset = 18;
            }
            match ethertype {
                ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => frame.get(offset..)?,
                _ => return None,
            }
        }
        LinkType::LinuxSll => match read_u16(frame, 14)? {
            ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => frame.get(16..)?,
            _ => return None,
        },
        LinkType::Loopback => frame.get(4..)?,
        LinkType::Raw => frame,
    };

    match packet.first()? >> 4 {
        4 => ipv4(packet),
        6 => ipv6(packet),
        _ => None,
    }
}

fn ipv4(data: &[u8]) -> Option<UdpDatagram<'_>> {
    if data.len() < 20 || data[9] != PROTO_UDP {
        return None;
    }
    // Later fragments carry no UDP header.
    let frag_offset = read_u16(data, 6)? & 0x1FFF;
    if frag_offset != 0 {
        return None;
    }

    let ihl = usize::from(data[0] & 0x0F) * 4;
    let total_len = usize::from(read_u16(data, 2)?).min(data.len());
    if ihl < 20 || ihl > total_len {
        return None;
    }

    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    udp(src.into(), dst.into(), &data[ihl..total_len])
}

fn ipv6(data: &[u8]) -> Option<UdpDatagram<'_>> {
    if data.len() < 40 || data[6] != PROTO_UDP {
        return None;
    }

    let payload_len = usize::from(read_u16(data, 4)?);
    let end = (40 + payload_len).min(data.len());

    let src: [u8; 16] = data[8..24].try_into().ok()?;
    let dst: [u8; 16] = data[24..40].try_into().ok()?;
    udp(
        Ipv6Addr::from(src).into(),
        Ipv6Addr::from(dst).into(),
        &data[40..end],
    )
}

fn udp(src: IpAddr, dst: IpAddr, data: &[u8]) -> Option<UdpDatagram<'_>> {
    let src_port = read_u16(data, 0)?;
    let dst_port = read_u16(data, 2)?;
    let len = usize::from(read_u16(data, 4)?);
    if len < 8 {
        return None;
    }
    let end = len.min(data.len());

    Some(UdpDatagram {
        src,
        dst,
        src_port,
        dst_port,
        payload: &data[8..end],
    })
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}
