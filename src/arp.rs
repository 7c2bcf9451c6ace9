//! ARP resolver and cache (spec.md §4.2).
//!
//! Grounded on `examples/original_source/ip.c` (`arp_sendquery`,
//! `arp_handle`, `arp_sendAliveQuery`, and the ARP-learning half of
//! `ip_handle`) for field-level semantics; wire encode/decode style borrowed
//! from `examples/other_examples/1196c1d0_SlopLabs-slopos__drivers-src-net-arp.rs.rs`
//! (byte-offset writes into a fixed-size array, no `#[repr(C)]` struct
//! overlay — see design note §9 on interior pointer aliasing).

use crate::config::{ARP_ENTRY_LIFETIME_TICKS, MAX_ARP_ENTRIES};
use crate::eth::{EthernetDevice, ETHERTYPE_ARP};
use crate::types::{HostConfig, Ipv4Addr, MacAddr};

pub const ARP_FRAME_LEN: usize = 28;

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_HLEN_ETHERNET: u8 = 6;
const ARP_PLEN_IPV4: u8 = 4;
const ARP_OPER_REQUEST: u16 = 1;
const ARP_OPER_REPLY: u16 = 2;

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum ArpState {
    Disabled,
    Waiting,
    Enabled,
}

#[derive(Copy, Clone)]
pub struct ArpEntry {
    pub state: ArpState,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub lifetime: u16,
}

impl ArpEntry {
    const fn blank() -> Self {
        ArpEntry {
            state: ArpState::Disabled,
            ip: Ipv4Addr::UNSPECIFIED,
            mac: MacAddr::ZERO,
            lifetime: 0,
        }
    }
}

/// Outcome of a resolution attempt. Never blocks: see SPEC_FULL.md §5 for why
/// the original's busy-wait is translated into "issue the query, return
/// `Pending`, let the caller re-poll after feeding it more frames/ticks".
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Resolution {
    Resolved(MacAddr),
    Pending,
    /// No free ARP slot to track the query (spec.md §7: resource exhaustion).
    Failed,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArpOutcome {
    Request,
    Reply,
}

/// Where an outbound datagram to `dst` should be sent: to `dst` directly (on
/// the same subnet) or via the gateway. Broadcast bypasses ARP entirely.
pub enum Route {
    Broadcast,
    Direct(Ipv4Addr),
    Gateway(Ipv4Addr),
}

pub fn route_for(dst: Ipv4Addr, config: &HostConfig) -> Route {
    if dst == Ipv4Addr::BROADCAST {
        Route::Broadcast
    } else if dst.same_subnet(config.local_ip, config.netmask) {
        Route::Direct(dst)
    } else {
        Route::Gateway(config.gateway_ip)
    }
}

pub struct ArpTable {
    entries: [ArpEntry; MAX_ARP_ENTRIES],
}

impl ArpTable {
    pub const fn new() -> Self {
        ArpTable {
            entries: [ArpEntry::blank(); MAX_ARP_ENTRIES],
        }
    }

    /// First-match lookup among `Enabled` entries (spec.md §4.2: "the table
    /// is scanned linearly; first match wins").
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|e| e.state == ArpState::Enabled && e.ip == ip)
            .map(|e| e.mac)
    }

    /// Install or refresh an entry from any received IPv4 datagram's source
    /// address (spec.md §4.2: "IP learning also happens opportunistically").
    /// Only refreshes an already-`Enabled` entry; a `Waiting` entry is left
    /// alone; that query can only be completed by a verified ARP reply
    /// through `handle()`. Otherwise a new entry is allocated into a free
    /// `Disabled` slot, matching `examples/original_source/ip.c`'s
    /// `ip_handle()`, which re-searches for a free slot whenever the
    /// IP-matched entry isn't `ENABLED` rather than reusing it.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.ip == ip && e.state == ArpState::Enabled) {
            e.mac = mac;
            e.lifetime = ARP_ENTRY_LIFETIME_TICKS;
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| e.state == ArpState::Disabled) {
            e.ip = ip;
            e.mac = mac;
            e.state = ArpState::Enabled;
            e.lifetime = ARP_ENTRY_LIFETIME_TICKS;
        }
        // No free slot: silently dropped, per spec.md §7.
    }

    fn allocate_waiting(&mut self, ip: Ipv4Addr) -> bool {
        if let Some(e) = self.entries.iter_mut().find(|e| e.state == ArpState::Disabled) {
            e.ip = ip;
            e.state = ArpState::Waiting;
            e.lifetime = 0;
            true
        } else {
            false
        }
    }

    /// Resolve `ip` to a MAC address. Returns `Resolved` immediately if
    /// cached; otherwise issues a query (if one isn't already outstanding)
    /// and returns `Pending`. Callers reproducing the original's bounded
    /// busy-wait re-call this (after feeding inbound frames / advancing
    /// ticks) until `Resolved` or `ARP_RESOLVE_TIMEOUT_TICKS` have elapsed.
    pub fn resolve<D: EthernetDevice>(&mut self, device: &mut D, config: &HostConfig, ip: Ipv4Addr) -> Resolution {
        if let Some(mac) = self.lookup(ip) {
            return Resolution::Resolved(mac);
        }
        if self.entries.iter().any(|e| e.state == ArpState::Waiting && e.ip == ip) {
            return Resolution::Pending;
        }
        if self.allocate_waiting(ip) {
            log::debug!("arp: querying for {}", ip);
            send_request(device, config, ip);
            Resolution::Pending
        } else {
            log::warn!("arp: table full, dropping query for {}", ip);
            Resolution::Failed
        }
    }

    /// Gratuitous ARP: announce our own binding (spec.md §4.2 `announce`).
    pub fn announce<D: EthernetDevice>(&self, device: &mut D, config: &HostConfig, ip: Ipv4Addr) {
        send_request(device, config, ip);
    }

    /// Handle an inbound ARP frame (request addressed to us, or a reply to
    /// one of our outstanding queries).
    pub fn handle<D: EthernetDevice>(&mut self, device: &mut D, config: &HostConfig, payload: &[u8]) -> Option<ArpOutcome> {
        let pkt = ArpPacket::parse(payload)?;
        if pkt.oper == ARP_OPER_REQUEST && pkt.target_ip == config.local_ip {
            send_reply(device, config, pkt.sender_mac, pkt.sender_ip);
            Some(ArpOutcome::Request)
        } else if pkt.oper == ARP_OPER_REPLY
            && pkt.target_ip == config.local_ip
            && pkt.target_mac == config.local_mac
        {
            if let Some(e) = self
                .entries
                .iter_mut()
                .find(|e| e.state == ArpState::Waiting && e.ip == pkt.sender_ip)
            {
                e.mac = pkt.sender_mac;
                e.state = ArpState::Enabled;
                e.lifetime = ARP_ENTRY_LIFETIME_TICKS;
            }
            Some(ArpOutcome::Reply)
        } else {
            None
        }
    }

    /// Per-tick lifetime decrement (spec.md §4.7): `Enabled` entries whose
    /// lifetime reaches zero revert to `Disabled`.
    pub fn tick(&mut self) {
        for e in self.entries.iter_mut() {
            if e.state == ArpState::Enabled {
                e.lifetime = e.lifetime.saturating_sub(1);
                if e.lifetime == 0 {
                    e.state = ArpState::Disabled;
                }
            }
        }
    }
}

struct ArpPacket {
    oper: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
}

impl ArpPacket {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ARP_FRAME_LEN {
            return None;
        }
        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        if htype != ARP_HTYPE_ETHERNET
            || ptype != ARP_PTYPE_IPV4
            || data[4] != ARP_HLEN_ETHERNET
            || data[5] != ARP_PLEN_IPV4
        {
            return None;
        }
        Some(ArpPacket {
            oper: u16::from_be_bytes([data[6], data[7]]),
            sender_mac: MacAddr::new(data[8..14].try_into().unwrap()),
            sender_ip: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            target_mac: MacAddr::new(data[18..24].try_into().unwrap()),
            target_ip: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
        })
    }
}

fn encode(oper: u16, sender_mac: MacAddr, sender_ip: Ipv4Addr, target_mac: MacAddr, target_ip: Ipv4Addr) -> [u8; ARP_FRAME_LEN] {
    let mut buf = [0u8; ARP_FRAME_LEN];
    buf[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    buf[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    buf[4] = ARP_HLEN_ETHERNET;
    buf[5] = ARP_PLEN_IPV4;
    buf[6..8].copy_from_slice(&oper.to_be_bytes());
    buf[8..14].copy_from_slice(sender_mac.as_bytes());
    buf[14..18].copy_from_slice(sender_ip.as_bytes());
    buf[18..24].copy_from_slice(target_mac.as_bytes());
    buf[24..28].copy_from_slice(target_ip.as_bytes());
    buf
}

fn send_request<D: EthernetDevice>(device: &mut D, config: &HostConfig, target_ip: Ipv4Addr) {
    let frame = encode(
        ARP_OPER_REQUEST,
        config.local_mac,
        config.local_ip,
        MacAddr::ZERO,
        target_ip,
    );
    device.send_frame(MacAddr::BROADCAST, ETHERTYPE_ARP, &frame);
}

fn send_reply<D: EthernetDevice>(device: &mut D, config: &HostConfig, target_mac: MacAddr, target_ip: Ipv4Addr) {
    let frame = encode(ARP_OPER_REPLY, config.local_mac, config.local_ip, target_mac, target_ip);
    device.send_frame(target_mac, ETHERTYPE_ARP, &frame);
}
