//! IPv4 header assembly, parsing, routing and dispatch (spec.md §4.3).
//!
//! Grounded on `examples/original_source/ip.c` (`ip_send`, `ip_handle`) for
//! the exact header field values and drop conditions. The fixed values
//! `ip_send` always uses — version/IHL `0x45`, ID `0x0400`, flags `0x4000`
//! (don't-fragment, no offset), TTL `128` — are kept verbatim; the checksum
//! itself uses the conventional algorithm in `crate::checksum` rather than
//! the original's byte-subtraction routine (spec.md §9).

use crate::arp::{route_for, ArpTable, Resolution, Route};
use crate::checksum;
use crate::config::IP_TX_BUF_SIZE;
use crate::eth::EthernetDevice;
use crate::types::{HostConfig, Ipv4Addr};

pub const IPV4_HEADER_LEN: usize = 20;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

const VER_IHL: u8 = 0x45;
const ID_FIXED: u16 = 0x0400;
const FLAGS_DONT_FRAGMENT: u16 = 0x4000;
const TTL_FIXED: u8 = 128;

/// A parsed view over an inbound IPv4 datagram.
pub struct Ipv4Packet<'a> {
    pub source_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub protocol: u8,
    pub header_len: usize,
    pub payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    /// Parse and validate a datagram. Returns `None` for anything too short
    /// to hold a header, anything carrying fragmentation state (spec.md
    /// §4.3: "fragmented datagrams are dropped, not reassembled"), and
    /// anything whose checksum doesn't verify.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }
        let ihl = (data[0] & 0x0F) as usize * 4;
        if ihl < IPV4_HEADER_LEN || data.len() < ihl {
            return None;
        }
        let flags_frag = u16::from_be_bytes([data[6], data[7]]);
        let more_fragments = flags_frag & 0x2000 != 0;
        let frag_offset = flags_frag & 0x1FFF;
        if more_fragments || frag_offset != 0 {
            return None;
        }
        if !checksum::verify(&data[..ihl]) {
            return None;
        }
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_len > data.len() || total_len < ihl {
            return None;
        }
        Some(Ipv4Packet {
            source_ip: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dest_ip: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            protocol: data[9],
            header_len: ihl,
            payload: &data[ihl..total_len],
        })
    }
}

/// Build a complete IPv4 datagram (header + payload) into `out`, returning
/// the number of bytes written, or `None` if it wouldn't fit.
pub fn build(out: &mut [u8], config: &HostConfig, dest_ip: Ipv4Addr, protocol: u8, payload: &[u8]) -> Option<usize> {
    let total_len = IPV4_HEADER_LEN + payload.len();
    if total_len > out.len() || total_len > IP_TX_BUF_SIZE {
        return None;
    }
    out[0] = VER_IHL;
    out[1] = 0x00;
    out[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    out[4..6].copy_from_slice(&ID_FIXED.to_be_bytes());
    out[6..8].copy_from_slice(&FLAGS_DONT_FRAGMENT.to_be_bytes());
    out[8] = TTL_FIXED;
    out[9] = protocol;
    out[10] = 0;
    out[11] = 0;
    out[12..16].copy_from_slice(config.local_ip.as_bytes());
    out[16..20].copy_from_slice(dest_ip.as_bytes());
    let sum = checksum::checksum(&out[..IPV4_HEADER_LEN]);
    out[10..12].copy_from_slice(&sum.to_be_bytes());
    out[IPV4_HEADER_LEN..total_len].copy_from_slice(payload);
    Some(total_len)
}

/// Assemble and transmit an IPv4 datagram, resolving the next hop (direct or
/// via gateway) through `arp`. Returns `false` if the datagram doesn't fit,
/// or if the next hop can't be resolved (no ARP reply yet, or the table is
/// full) — matching the original's silent drop on ARP resolution failure.
pub fn send<D: EthernetDevice>(
    device: &mut D,
    arp: &mut ArpTable,
    config: &HostConfig,
    dest_ip: Ipv4Addr,
    protocol: u8,
    payload: &[u8],
) -> bool {
    let mut buf = [0u8; IP_TX_BUF_SIZE];
    let Some(len) = build(&mut buf, config, dest_ip, protocol, payload) else {
        return false;
    };
    let datagram = &buf[..len];

    match route_for(dest_ip, config) {
        Route::Broadcast => {
            device.send_frame(crate::types::MacAddr::BROADCAST, crate::eth::ETHERTYPE_IPV4, datagram);
            true
        }
        Route::Direct(next_hop) | Route::Gateway(next_hop) => match arp.resolve(device, config, next_hop) {
            Resolution::Resolved(mac) => {
                device.send_frame(mac, crate::eth::ETHERTYPE_IPV4, datagram);
                true
            }
            Resolution::Pending | Resolution::Failed => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HostConfig {
        HostConfig {
            local_ip: Ipv4Addr::new(192, 168, 2, 156),
            gateway_ip: Ipv4Addr::new(192, 168, 2, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            local_mac: crate::types::MacAddr::new([0x4E, 0x45, 0x58, 0x54, 0x4F, 0x4E]),
        }
    }

    #[test]
    fn build_then_parse_round_trips() {
        let cfg = config();
        let mut buf = [0u8; 64];
        let payload = b"hello";
        let len = build(&mut buf, &cfg, Ipv4Addr::new(192, 168, 2, 1), PROTO_UDP, payload).unwrap();
        let pkt = Ipv4Packet::parse(&buf[..len]).unwrap();
        assert_eq!(pkt.source_ip, cfg.local_ip);
        assert_eq!(pkt.dest_ip, Ipv4Addr::new(192, 168, 2, 1));
        assert_eq!(pkt.protocol, PROTO_UDP);
        assert_eq!(pkt.payload, payload);
    }

    #[test]
    fn fixed_header_fields() {
        let cfg = config();
        let mut buf = [0u8; 64];
        let len = build(&mut buf, &cfg, Ipv4Addr::new(192, 168, 2, 1), PROTO_ICMP, &[]).unwrap();
        assert_eq!(buf[0], VER_IHL);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 0x0400);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 0x4000);
        assert_eq!(buf[8], 128);
        let _ = len;
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let cfg = config();
        let mut buf = [0u8; 64];
        let len = build(&mut buf, &cfg, Ipv4Addr::new(192, 168, 2, 1), PROTO_UDP, b"x").unwrap();
        buf[1] ^= 0xFF;
        assert!(Ipv4Packet::parse(&buf[..len]).is_none());
    }

    #[test]
    fn fragment_offset_dropped() {
        let cfg = config();
        let mut buf = [0u8; 64];
        let len = build(&mut buf, &cfg, Ipv4Addr::new(192, 168, 2, 1), PROTO_UDP, b"x").unwrap();
        buf[6] = 0x00;
        buf[7] = 0x01; // nonzero fragment offset
        buf[10] = 0;
        buf[11] = 0;
        let sum = checksum::checksum(&buf[..IPV4_HEADER_LEN]);
        buf[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(Ipv4Packet::parse(&buf[..len]).is_none());
    }
}
