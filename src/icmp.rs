//! ICMP echo responder (spec.md §4.4).
//!
//! Grounded on `examples/original_source/icmp.c::icmp_handle`. Only echo
//! request (type 8) is handled; everything else is ignored. Unlike the
//! original, which mutates the inbound packet in place and recomputes only
//! the ICMP checksum (leaving `ip_send`'s own header assembly to redo the
//! IPv4 checksum), this builds a fresh reply and always recomputes both
//! checksums explicitly — see spec.md §9's note on the original's checksum
//! handling being easy to get wrong in place.

use crate::arp::ArpTable;
use crate::checksum;
use crate::eth::EthernetDevice;
use crate::ipv4;
use crate::types::{HostConfig, Ipv4Addr};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;

/// Handle an inbound ICMP message. `payload` is the ICMP message (type,
/// code, checksum, rest-of-header, data) with the IPv4 header already
/// stripped. Returns `true` if an echo reply was sent.
pub fn handle<D: EthernetDevice>(
    device: &mut D,
    arp: &mut ArpTable,
    config: &HostConfig,
    source_ip: Ipv4Addr,
    payload: &[u8],
) -> bool {
    if payload.len() < ICMP_HEADER_LEN || payload[0] != ICMP_ECHO_REQUEST {
        return false;
    }

    let mut reply = [0u8; 576 - ipv4::IPV4_HEADER_LEN];
    if payload.len() > reply.len() {
        return false;
    }
    reply[..payload.len()].copy_from_slice(payload);
    reply[0] = ICMP_ECHO_REPLY;
    reply[1] = 0;
    reply[2] = 0;
    reply[3] = 0;
    let sum = checksum::checksum(&reply[..payload.len()]);
    reply[2..4].copy_from_slice(&sum.to_be_bytes());

    ipv4::send(device, arp, config, source_ip, ipv4::PROTO_ICMP, &reply[..payload.len()])
}
