//! UDP endpoint table: bind, send, receive (spec.md §4.5).
//!
//! Grounded on `examples/original_source/udp.c`/`udp.h`: a fixed socket
//! table, first-fit registration, and a `Waiting`/`Established` state pair
//! that flips back to `Waiting` once the application has drained a
//! datagram. The original computes the outbound checksum over a
//! pseudo-header + header + payload laid out contiguously in one scratch
//! buffer (offset 12 is where the real UDP header starts, after the
//! 12-byte pseudo-header) — kept here as the same buffer-offset trick.

use crate::arp::ArpTable;
use crate::checksum;
use crate::config::{MAX_UDP_SOCKETS, UDP_TX_BUF_SIZE};
use crate::eth::EthernetDevice;
use crate::ipv4;
use crate::types::{HostConfig, Ipv4Addr};

const UDP_HEADER_LEN: usize = 8;
const PSEUDO_HEADER_LEN: usize = 12;

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum UdpState {
    Unused,
    Waiting,
    Established,
}

/// A single bound UDP endpoint. The receive buffer is borrowed from the
/// caller (spec.md §2: "no heap, buffers are supplied by the application").
pub struct UdpSocket<'a> {
    state: UdpState,
    local_port: u16,
    source_ip: Ipv4Addr,
    recv_buf: &'a mut [u8],
    recv_len: usize,
}

impl<'a> UdpSocket<'a> {
    fn blank(recv_buf: &'a mut [u8]) -> Self {
        UdpSocket {
            state: UdpState::Unused,
            local_port: 0,
            source_ip: Ipv4Addr::UNSPECIFIED,
            recv_buf,
            recv_len: 0,
        }
    }

    /// The most recent datagram's payload and sender, if one has arrived
    /// since the last call. Reregisters the socket for the next datagram.
    pub fn recv(&mut self) -> Option<(Ipv4Addr, &[u8])> {
        if self.state != UdpState::Established {
            return None;
        }
        self.state = UdpState::Waiting;
        Some((self.source_ip, &self.recv_buf[..self.recv_len]))
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_bound(&self) -> bool {
        self.state != UdpState::Unused
    }
}

pub struct UdpTable<'a> {
    sockets: [Option<UdpSocket<'a>>; MAX_UDP_SOCKETS],
}

impl<'a> UdpTable<'a> {
    pub fn new() -> Self {
        UdpTable {
            sockets: core::array::from_fn(|_| None),
        }
    }

    /// Bind `recv_buf` to `port`. Returns the socket's table index, or
    /// `None` if every slot is already bound.
    pub fn bind(&mut self, port: u16, recv_buf: &'a mut [u8]) -> Option<usize> {
        let slot = self.sockets.iter().position(|s| s.is_none())?;
        let mut socket = UdpSocket::blank(recv_buf);
        socket.state = UdpState::Waiting;
        socket.local_port = port;
        self.sockets[slot] = Some(socket);
        Some(slot)
    }

    pub fn unbind(&mut self, slot: usize) {
        if let Some(s) = self.sockets.get_mut(slot) {
            *s = None;
        }
    }

    pub fn socket(&mut self, slot: usize) -> Option<&mut UdpSocket<'a>> {
        self.sockets.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Handle an inbound UDP datagram. `payload` is the UDP header + data
    /// with the IPv4 header already stripped.
    pub fn handle(&mut self, source_ip: Ipv4Addr, payload: &[u8]) {
        if payload.len() < UDP_HEADER_LEN {
            return;
        }
        let dest_port = u16::from_be_bytes([payload[2], payload[3]]);
        let length = u16::from_be_bytes([payload[4], payload[5]]) as usize;
        if length < UDP_HEADER_LEN || length > payload.len() {
            return;
        }
        let data = &payload[UDP_HEADER_LEN..length];

        for socket in self.sockets.iter_mut().flatten() {
            if socket.state == UdpState::Waiting && socket.local_port == dest_port {
                if data.len() <= socket.recv_buf.len() {
                    socket.recv_buf[..data.len()].copy_from_slice(data);
                    socket.recv_len = data.len();
                    socket.source_ip = source_ip;
                    socket.state = UdpState::Established;
                }
            }
        }
    }
}

/// Assemble and send a UDP datagram (spec.md §4.5 `send`).
pub fn send<D: EthernetDevice>(
    device: &mut D,
    arp: &mut ArpTable,
    config: &HostConfig,
    dest_ip: Ipv4Addr,
    local_port: u16,
    dest_port: u16,
    msg: &[u8],
) -> bool {
    let mut buf = [0u8; UDP_TX_BUF_SIZE];
    let total = PSEUDO_HEADER_LEN + UDP_HEADER_LEN + msg.len();
    if total > buf.len() {
        return false;
    }

    let udp_len = (UDP_HEADER_LEN + msg.len()) as u16;

    buf[0..4].copy_from_slice(config.local_ip.as_bytes());
    buf[4..8].copy_from_slice(dest_ip.as_bytes());
    buf[8] = 0;
    buf[9] = ipv4::PROTO_UDP;
    buf[10..12].copy_from_slice(&udp_len.to_be_bytes());

    let header = PSEUDO_HEADER_LEN;
    buf[header..header + 2].copy_from_slice(&local_port.to_be_bytes());
    buf[header + 2..header + 4].copy_from_slice(&dest_port.to_be_bytes());
    buf[header + 4..header + 6].copy_from_slice(&udp_len.to_be_bytes());
    buf[header + 6] = 0;
    buf[header + 7] = 0;
    buf[header + UDP_HEADER_LEN..total].copy_from_slice(msg);

    let sum = checksum::checksum(&buf[..total]);
    buf[header + 6..header + 8].copy_from_slice(&sum.to_be_bytes());

    ipv4::send(device, arp, config, dest_ip, ipv4::PROTO_UDP, &buf[header..total])
}
