//! Top-level stack: wires link, ARP, IPv4, ICMP, UDP and TCP together.
//!
//! Grounded on `sw/net`'s `NetState` + `handle_frame`/`handle_ipv4_frame`
//! dispatch chain (`examples/betrusted-io-betrusted-ec/sw/net/src/lib.rs`),
//! generalized from a single hardware-bound struct into a `NetStack<'a>`
//! that owns no device itself — the `EthernetDevice` is supplied by the
//! caller on every call, the same shape `crate::arp`/`crate::ipv4` already
//! use (spec.md §6: the link layer is an external collaborator).

use crate::arp::{ArpOutcome, ArpTable};
use crate::eth::{EthFrame, EthernetDevice, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::filter::{DispatchOutcome, DispatchStats};
use crate::icmp;
use crate::ipv4::{self, Ipv4Packet, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use crate::tcp::{TcpSegment, TcpState, TcpTable};
use crate::timer::Ticks;
use crate::types::HostConfig;
use crate::udp::UdpTable;

/// A `HostConfig` that can't be used to build a `NetStack` (spec.md §7's
/// configuration-time error case, the one place this crate returns a
/// `Result`; every packet-processing path stays infallible — see
/// SPEC_FULL.md §2 "Error handling").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConfigError {
    /// `netmask` is not a left-aligned run of one bits (e.g. `255.0.255.0`).
    NonContiguousNetmask,
    /// `gateway_ip` is not reachable under `local_ip`/`netmask`.
    GatewayOutsideSubnet,
}

pub struct NetStack<'a> {
    pub config: HostConfig,
    pub arp: ArpTable,
    pub udp: UdpTable<'a>,
    pub tcp: TcpTable<'a>,
    pub stats: DispatchStats,
    now: Ticks,
}

impl<'a> NetStack<'a> {
    pub fn new(config: HostConfig) -> Result<Self, ConfigError> {
        validate_config(&config)?;
        Ok(NetStack {
            config,
            arp: ArpTable::new(),
            udp: UdpTable::new(),
            tcp: TcpTable::new(),
            stats: DispatchStats::new(),
            now: Ticks::zero(),
        })
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Advance the stack by one tick: ARP lifetime decrement and TCP
    /// sustain (spec.md §4.7, grounded on `gtimer.c`'s `TIMER0_OVF_vect`).
    pub fn tick<D: EthernetDevice>(&mut self, device: &mut D) {
        self.now = self.now.next();
        self.arp.tick();
        self.tcp.tick(device, &mut self.arp, &self.config);
    }

    /// Handle one inbound Ethernet frame. Never panics or propagates an
    /// error: every outcome, including drops, is recorded in `self.stats`
    /// and returned for the caller's own visibility.
    pub fn on_frame<D: EthernetDevice>(&mut self, device: &mut D, frame: &[u8]) -> DispatchOutcome {
        let outcome = self.dispatch_frame(device, frame);
        if matches!(
            outcome,
            DispatchOutcome::DropNoise | DispatchOutcome::DropBadChecksum | DispatchOutcome::DropFragment
        ) {
            log::trace!("dropped inbound frame: {:?}", outcome);
        }
        self.stats.record(outcome);
        outcome
    }

    /// Blocking convenience over `TcpSocket::try_read_byte` (spec.md §4.6's
    /// stream read, translated per SPEC_FULL.md §5): calls `pump` — typically
    /// the caller's own "poll the driver, feed it a frame, tick" loop body —
    /// until a byte arrives or the socket leaves `Established`. `pump` takes
    /// `&mut Self` rather than closing over a socket reference directly,
    /// since driving new data in requires the whole stack (`on_frame`/`tick`),
    /// not just this one socket.
    pub fn read_byte<D: EthernetDevice>(
        &mut self,
        device: &mut D,
        tcp_slot: usize,
        mut pump: impl FnMut(&mut Self, &mut D),
    ) -> Option<u8> {
        loop {
            if self.tcp.socket(tcp_slot)?.state() != TcpState::Established {
                return None;
            }
            if let Some(byte) = self.tcp.socket(tcp_slot)?.try_read_byte(device, &mut self.arp, &self.config) {
                return Some(byte);
            }
            pump(self, device);
        }
    }

    /// Blocking convenience over `TcpSocket::try_write_byte`, see
    /// [`NetStack::read_byte`].
    pub fn write_byte<D: EthernetDevice>(
        &mut self,
        device: &mut D,
        tcp_slot: usize,
        byte: u8,
        mut pump: impl FnMut(&mut Self, &mut D),
    ) -> bool {
        loop {
            let Some(socket) = self.tcp.socket(tcp_slot) else {
                return false;
            };
            if socket.state() != TcpState::Established {
                return false;
            }
            if socket.try_write_byte(byte) {
                return true;
            }
            pump(self, device);
        }
    }

    fn dispatch_frame<D: EthernetDevice>(&mut self, device: &mut D, frame: &[u8]) -> DispatchOutcome {
        let Some(eth) = EthFrame::parse(frame) else {
            return DispatchOutcome::DropNoise;
        };

        match eth.ethertype {
            ETHERTYPE_ARP => match self.arp.handle(device, &self.config, eth.payload) {
                Some(ArpOutcome::Request) => DispatchOutcome::ArpRequest,
                Some(ArpOutcome::Reply) => DispatchOutcome::ArpReply,
                None => DispatchOutcome::DropNoise,
            },
            ETHERTYPE_IPV4 => self.dispatch_ipv4(device, eth.src_mac, eth.payload),
            _ => DispatchOutcome::DropEtherType,
        }
    }

    fn dispatch_ipv4<D: EthernetDevice>(&mut self, device: &mut D, src_mac: crate::types::MacAddr, datagram: &[u8]) -> DispatchOutcome {
        let Some(pkt) = Ipv4Packet::parse(datagram) else {
            // `Ipv4Packet::parse` folds "too short", "bad checksum" and
            // "fragmented" into one `None`; distinguish them here the same
            // way `ip_handle` does, for accounting purposes only.
            return classify_ipv4_rejection(datagram);
        };

        self.arp.learn(pkt.source_ip, src_mac);

        match pkt.protocol {
            PROTO_ICMP => {
                icmp::handle(device, &mut self.arp, &self.config, pkt.source_ip, pkt.payload);
                DispatchOutcome::Icmp
            }
            PROTO_UDP => {
                self.udp.handle(pkt.source_ip, pkt.payload);
                DispatchOutcome::Udp
            }
            PROTO_TCP => {
                if let Some(seg) = TcpSegment::parse(pkt.payload) {
                    self.tcp.handle(device, &mut self.arp, &self.config, pkt.source_ip, &seg);
                }
                DispatchOutcome::Tcp
            }
            _ => DispatchOutcome::DropProtocol,
        }
    }
}

/// `netmask` must be a left-aligned run of one bits followed by a run of
/// zero bits (no "255.0.255.0"-style holes), and `gateway_ip` must be
/// reachable under `local_ip`/`netmask` — both are assumptions the routing
/// decision in `crate::arp::route_for` silently relies on.
fn validate_config(config: &HostConfig) -> Result<(), ConfigError> {
    let mask = u32::from_be_bytes(*config.netmask.as_bytes());
    let ones_then_zeros = mask.leading_ones() + mask.trailing_zeros() == 32;
    if !ones_then_zeros {
        return Err(ConfigError::NonContiguousNetmask);
    }
    if !config.local_ip.same_subnet(config.gateway_ip, config.netmask) {
        return Err(ConfigError::GatewayOutsideSubnet);
    }
    Ok(())
}

fn classify_ipv4_rejection(data: &[u8]) -> DispatchOutcome {
    if data.len() < ipv4::IPV4_HEADER_LEN {
        return DispatchOutcome::DropNoise;
    }
    let ihl = (data[0] & 0x0F) as usize * 4;
    if ihl < ipv4::IPV4_HEADER_LEN || data.len() < ihl {
        return DispatchOutcome::DropNoise;
    }
    let flags_frag = u16::from_be_bytes([data[6], data[7]]);
    if flags_frag & 0x2000 != 0 || flags_frag & 0x1FFF != 0 {
        return DispatchOutcome::DropFragment;
    }
    DispatchOutcome::DropBadChecksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::MAC_HEADER_LEN;
    use crate::types::{Ipv4Addr, MacAddr};
    use std::vec::Vec;

    struct RecordingDevice {
        sent: Vec<(MacAddr, u16, Vec<u8>)>,
    }
    impl EthernetDevice for RecordingDevice {
        fn send_frame(&mut self, dst_mac: MacAddr, ethertype: u16, payload: &[u8]) {
            self.sent.push((dst_mac, ethertype, payload.to_vec()));
        }
    }

    fn config() -> HostConfig {
        HostConfig {
            local_ip: Ipv4Addr::new(192, 168, 2, 156),
            gateway_ip: Ipv4Addr::new(192, 168, 2, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            local_mac: MacAddr::new([0x4E, 0x45, 0x58, 0x54, 0x4F, 0x4E]),
        }
    }

    fn eth_wrap(dst: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MAC_HEADER_LEN + payload.len());
        frame.extend_from_slice(dst.as_bytes());
        frame.extend_from_slice(src.as_bytes());
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn unknown_ethertype_is_dropped() {
        let mut stack = NetStack::new(config()).unwrap();
        let mut dev = RecordingDevice { sent: Vec::new() };
        let frame = eth_wrap(MacAddr::BROADCAST, MacAddr::ZERO, 0x86DD, &[0, 1, 2]);
        assert_eq!(stack.on_frame(&mut dev, &frame), DispatchOutcome::DropEtherType);
        assert_eq!(stack.stats.drop_ether_type, 1);
    }

    #[test]
    fn short_frame_is_noise() {
        let mut stack = NetStack::new(config()).unwrap();
        let mut dev = RecordingDevice { sent: Vec::new() };
        assert_eq!(stack.on_frame(&mut dev, &[1, 2, 3]), DispatchOutcome::DropNoise);
        assert_eq!(stack.stats.drop_noise, 1);
    }

    #[test]
    fn icmp_echo_end_to_end() {
        let cfg = config();
        let mut stack = NetStack::new(cfg).unwrap();
        let mut dev = RecordingDevice { sent: Vec::new() };
        let peer_ip = Ipv4Addr::new(192, 168, 2, 1);
        let peer_mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        stack.arp.learn(peer_ip, peer_mac);

        let mut icmp_payload = [0u8; 8];
        icmp_payload[0] = 8; // echo request
        let sum = crate::checksum::checksum(&icmp_payload);
        icmp_payload[2..4].copy_from_slice(&sum.to_be_bytes());

        // Build the inbound datagram by hand (peer -> us); `ipv4::build`
        // always stamps our own address as the source, since it's meant
        // for outbound sends.
        let total_len = ipv4::IPV4_HEADER_LEN + icmp_payload.len();
        let mut datagram = [0u8; 64];
        datagram[0] = 0x45;
        datagram[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        datagram[6..8].copy_from_slice(&0x4000u16.to_be_bytes());
        datagram[8] = 64;
        datagram[9] = PROTO_ICMP;
        datagram[12..16].copy_from_slice(peer_ip.as_bytes());
        datagram[16..20].copy_from_slice(cfg.local_ip.as_bytes());
        datagram[ipv4::IPV4_HEADER_LEN..total_len].copy_from_slice(&icmp_payload);
        let hdr_sum = crate::checksum::checksum(&datagram[..ipv4::IPV4_HEADER_LEN]);
        datagram[10..12].copy_from_slice(&hdr_sum.to_be_bytes());

        let frame = eth_wrap(cfg.local_mac, peer_mac, ETHERTYPE_IPV4, &datagram[..total_len]);
        let outcome = stack.on_frame(&mut dev, &frame);
        assert_eq!(outcome, DispatchOutcome::Icmp);
        assert_eq!(dev.sent.len(), 1);
    }

    /// Builds a raw IPv4+TCP frame from `peer` to `cfg.local_ip`. Segment
    /// checksum is left unvalidated (only the IPv4 header checksum is
    /// checked on ingress); this mirrors `TcpSegment::parse`'s own scope.
    fn tcp_frame(
        cfg: &HostConfig,
        peer_ip: Ipv4Addr,
        peer_mac: MacAddr,
        source_port: u16,
        dest_port: u16,
        seq_num: u32,
        ack_num: u32,
        flags: u8,
        data: &[u8],
    ) -> Vec<u8> {
        const TCP_HEADER_LEN: usize = 20;
        let total_len = ipv4::IPV4_HEADER_LEN + TCP_HEADER_LEN + data.len();
        let mut datagram = std::vec![0u8; total_len];
        datagram[0] = 0x45;
        datagram[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        datagram[6..8].copy_from_slice(&0x4000u16.to_be_bytes());
        datagram[8] = 64;
        datagram[9] = PROTO_TCP;
        datagram[12..16].copy_from_slice(peer_ip.as_bytes());
        datagram[16..20].copy_from_slice(cfg.local_ip.as_bytes());

        let t = ipv4::IPV4_HEADER_LEN;
        datagram[t..t + 2].copy_from_slice(&source_port.to_be_bytes());
        datagram[t + 2..t + 4].copy_from_slice(&dest_port.to_be_bytes());
        datagram[t + 4..t + 8].copy_from_slice(&seq_num.to_be_bytes());
        datagram[t + 8..t + 12].copy_from_slice(&ack_num.to_be_bytes());
        datagram[t + 12] = 5 << 4;
        datagram[t + 13] = flags;
        datagram[t + TCP_HEADER_LEN..total_len].copy_from_slice(data);

        let hdr_sum = crate::checksum::checksum(&datagram[..ipv4::IPV4_HEADER_LEN]);
        datagram[10..12].copy_from_slice(&hdr_sum.to_be_bytes());

        eth_wrap(cfg.local_mac, peer_mac, ETHERTYPE_IPV4, &datagram)
    }

    #[test]
    fn blocking_read_byte_pumps_until_data_arrives() {
        let cfg = config();
        let mut stack = NetStack::new(cfg).unwrap();
        let mut dev = RecordingDevice { sent: Vec::new() };
        let peer_ip = Ipv4Addr::new(192, 168, 2, 1);
        let peer_mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        stack.arp.learn(peer_ip, peer_mac);

        let mut recv = std::vec![0u8; 64];
        let mut send = std::vec![0u8; 64];
        let mut hold = std::vec![0u8; 64];
        let slot = stack.tcp.reserve(&mut recv, &mut send, &mut hold).unwrap();
        stack.tcp.socket(slot).unwrap().listen(7000);

        // Passive-open handshake: client SYN -> server SYN-ACK (Established).
        let syn = tcp_frame(&stack.config, peer_ip, peer_mac, 4000, 7000, 100, 0, 0x02, &[]);
        stack.on_frame(&mut dev, &syn);
        assert_eq!(stack.tcp.socket(slot).unwrap().state(), crate::tcp::TcpState::Established);

        let mut pumps = 0;
        let byte = stack.read_byte(&mut dev, slot, |stack, dev| {
            pumps += 1;
            if pumps == 2 {
                let data = tcp_frame(&stack.config, peer_ip, peer_mac, 4000, 7000, 101, 0, 0x10, b"x");
                stack.on_frame(dev, &data);
            }
        });
        assert_eq!(byte, Some(b'x'));
        assert_eq!(pumps, 2);
    }

    #[test]
    fn ticking_advances_counter() {
        let mut stack = NetStack::new(config()).unwrap();
        let mut dev = RecordingDevice { sent: Vec::new() };
        assert_eq!(stack.now(), Ticks::zero());
        stack.tick(&mut dev);
        assert_eq!(stack.now(), Ticks::zero().next());
    }

    #[test]
    fn rejects_noncontiguous_netmask() {
        let mut cfg = config();
        cfg.netmask = Ipv4Addr::new(255, 0, 255, 0);
        assert_eq!(NetStack::new(cfg).unwrap_err(), ConfigError::NonContiguousNetmask);
    }

    #[test]
    fn rejects_gateway_outside_subnet() {
        let mut cfg = config();
        cfg.gateway_ip = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(NetStack::new(cfg).unwrap_err(), ConfigError::GatewayOutsideSubnet);
    }
}
