//! TCP connection engine (spec.md §4.6).
//!
//! Grounded on `examples/original_source/tcp.c`/`tcp.h` — `tcp_send`,
//! `tcp_sustain`, `tcp_handle`, `increaseSeqNum`/`increaseAckNum` — almost
//! line for line; the socket struct shape (state enum plus plain fields,
//! rather than a C struct with embedded stdio stream) is generalized from
//! `sw/net`'s `DhcpClient` state-enum pattern. Sequence/ack numbers are
//! kept as a single `u32` rather than the original's two `u16` halves (see
//! DESIGN.md); the retransmission "holding" FIFO, the re-entrancy flag on
//! the sustainer, and the bounded close-wait are all kept.
//!
//! spec.md narrows the full eleven-state original machine down to
//! `Unused`/`Listen`/`SynSent`/`Established`/`FinWait1`/`Unknown` — the
//! states a minimal embedded stack actually uses (no simultaneous close, no
//! TIME_WAIT). This module implements exactly that subset.

use crate::arp::ArpTable;
use crate::checksum;
use crate::config::{
    MAX_TCP_SOCKETS, TCP_CLOSE_WAIT_TICKS, TCP_RETRY_INTERVAL, TCP_RX_BUF_MIN_DEN, TCP_RX_BUF_MIN_NUM,
    TCP_TOTAL_RETRIES, TCP_TX_BUF_SIZE,
};
use crate::eth::EthernetDevice;
use crate::fifo::ByteFifo;
use crate::ipv4;
use crate::types::{HostConfig, Ipv4Addr};

const TCP_HEADER_LEN: usize = 20;
const PSEUDO_HEADER_LEN: usize = 12;
/// Largest payload a single segment carries, sized so pseudo-header + TCP
/// header + payload fits in `config::TCP_TX_BUF_SIZE` (the scratch buffer
/// `send_segment` actually allocates).
const MAX_SEGMENT_PAYLOAD: usize = TCP_TX_BUF_SIZE - PSEUDO_HEADER_LEN - TCP_HEADER_LEN;

const FLAG_FIN: u8 = 0x01;
const FLAG_SYN: u8 = 0x02;
const FLAG_ACK: u8 = 0x10;
const FLAG_PSH: u8 = 0x08;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TcpState {
    Unused,
    Listen,
    SynSent,
    Established,
    FinWait1,
    Unknown,
}

pub struct TcpSocket<'a> {
    state: TcpState,
    local_port: u16,
    remote_port: u16,
    remote_ip: Ipv4Addr,

    seq_num: u32,
    ack_num: u32,
    /// Ticks remaining before the next retransmit is due; 0 means none
    /// pending (`sockets[cnt].ackState` in the original).
    ack_state: u16,
    retry_counter: u8,
    /// Ticks spent in `FinWait1`, capped at `TCP_CLOSE_WAIT_TICKS`.
    close_wait_ticks: u16,
    last_window_size: u16,
    /// Per-socket receive timeout in ticks; 0 disables it. Set via
    /// `set_timeout`.
    receive_timeout: u16,
    /// Ticks since `recv` was last non-empty while `Established`.
    idle_ticks: u16,

    recv: ByteFifo<'a>,
    send: ByteFifo<'a>,
    /// Holds the bytes of the most recently transmitted-but-unacked segment,
    /// so a retransmit resends the same bytes without reaching back into
    /// `send` (which has already moved past them).
    retransmit_holding: ByteFifo<'a>,
}

impl<'a> TcpSocket<'a> {
    pub fn new(recv_buf: &'a mut [u8], send_buf: &'a mut [u8], retransmit_buf: &'a mut [u8]) -> Self {
        TcpSocket {
            state: TcpState::Unused,
            local_port: 0,
            remote_port: 0,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            seq_num: 0,
            ack_num: 0,
            ack_state: 0,
            retry_counter: 0,
            close_wait_ticks: 0,
            last_window_size: 0,
            receive_timeout: 0,
            idle_ticks: 0,
            recv: ByteFifo::new(recv_buf),
            send: ByteFifo::new(send_buf),
            retransmit_holding: ByteFifo::new(retransmit_buf),
        }
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn listen(&mut self, local_port: u16) {
        self.state = TcpState::Listen;
        self.local_port = local_port;
    }

    /// Set the per-socket receive timeout, in ticks; 0 disables it (the
    /// default). Once `Established` with the receive FIFO continuously empty
    /// for this many ticks, the socket is torn down (`state()` reads
    /// `Unknown`), which `try_read_byte`/the blocking read wrapper already
    /// surface as end-of-stream.
    pub fn set_timeout(&mut self, ticks: u16) {
        self.receive_timeout = ticks;
    }

    pub fn connect<D: EthernetDevice>(
        &mut self,
        device: &mut D,
        arp: &mut ArpTable,
        config: &HostConfig,
        local_port: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
    ) {
        self.local_port = local_port;
        self.remote_ip = remote_ip;
        self.remote_port = remote_port;
        self.state = TcpState::SynSent;
        self.ack_state = TCP_RETRY_INTERVAL;
        self.retry_counter = TCP_TOTAL_RETRIES;
        send_segment(device, arp, config, self, FLAG_SYN, &[]);
        self.seq_num = self.seq_num.wrapping_add(1);
    }

    /// Send a FIN and move to `FinWait1`. Non-blocking: the original busy-waits
    /// up to 100 ticks for the peer's FIN/ACK before forcing the socket closed;
    /// here that bound is enforced by `tick` instead (see SPEC_FULL.md §5), and
    /// the caller polls `state()` until it reads `Unknown`.
    pub fn disconnect<D: EthernetDevice>(&mut self, device: &mut D, arp: &mut ArpTable, config: &HostConfig) {
        self.state = TcpState::FinWait1;
        self.close_wait_ticks = 0;
        send_segment(device, arp, config, self, FLAG_FIN | FLAG_ACK, &[]);
    }

    /// `true` once every enqueued byte has reached the peer and been acked
    /// (no retransmit pending). Non-blocking equivalent of `tcp_flush`:
    /// callers poll this after each `tick`/pump instead of busy-waiting.
    pub fn flushed(&self) -> bool {
        self.send.is_empty() && self.ack_state == 0 && self.retry_counter == 0
    }

    /// `true` while a `disconnect()` is still waiting out the peer's FIN/ACK
    /// (`FinWait1`, bounded by `TCP_CLOSE_WAIT_TICKS` in `tick`). Lets a
    /// caller poll for close completion instead of blocking on it.
    pub fn is_closing(&self) -> bool {
        self.state == TcpState::FinWait1
    }

    /// Pop one byte of received data if any is available, re-opening the
    /// advertised window with an explicit ACK if it had previously been
    /// clamped to zero. Never blocks; returns `None` immediately if the
    /// receive buffer is empty (the original's `tcp_getchar` busy-waits
    /// here instead — see SPEC_FULL.md §5).
    pub fn try_read_byte<D: EthernetDevice>(&mut self, device: &mut D, arp: &mut ArpTable, config: &HostConfig) -> Option<u8> {
        if self.state != TcpState::Established {
            return None;
        }
        let len = self.recv.len();
        if len == 0 {
            return None;
        }
        let threshold = self.recv.capacity() * TCP_RX_BUF_MIN_NUM as usize / TCP_RX_BUF_MIN_DEN as usize;
        if self.last_window_size == 0 && len < threshold {
            send_segment(device, arp, config, self, FLAG_ACK, &[]);
        }
        self.recv.pop()
    }

    /// Enqueue one byte for transmission. Returns `false` immediately if the
    /// send buffer is full (the original's `tcp_putchar` blocks until space
    /// frees up instead — see SPEC_FULL.md §5).
    pub fn try_write_byte(&mut self, byte: u8) -> bool {
        if self.state != TcpState::Established {
            return false;
        }
        self.send.push(byte)
    }

    /// Blocking convenience wrappers that loop `try_read_byte`/`try_write_byte`
    /// against a caller-supplied pump live on [`super::TcpTable`]/`NetStack`
    /// rather than here: the pump closure needs to drive the whole stack
    /// (receive frames, tick), which means mutable access wider than this one
    /// socket — see SPEC_FULL.md §5.

    /// Per-tick bookkeeping: retransmission countdown, `SynSent` retry,
    /// `Established` data drain/retransmit, and the bounded `FinWait1` wait.
    /// Mirrors `tcp_sustain`'s per-socket switch; the reentrancy guard itself
    /// lives one level up, on [`TcpTable::tick`].
    pub fn tick<D: EthernetDevice>(&mut self, device: &mut D, arp: &mut ArpTable, config: &HostConfig) {
        if self.ack_state > 0 {
            self.ack_state -= 1;
        }

        match self.state {
            TcpState::SynSent => {
                if self.ack_state == 0 {
                    if self.retry_counter > 0 {
                        send_segment(device, arp, config, self, FLAG_SYN, &[]);
                        self.ack_state = TCP_RETRY_INTERVAL;
                        self.retry_counter -= 1;
                    } else {
                        self.state = TcpState::Unknown;
                    }
                }
            }
            TcpState::Established => {
                if self.receive_timeout > 0 {
                    if self.recv.is_empty() {
                        self.idle_ticks = self.idle_ticks.saturating_add(1);
                        if self.idle_ticks >= self.receive_timeout {
                            self.state = TcpState::Unknown;
                            return;
                        }
                    } else {
                        self.idle_ticks = 0;
                    }
                }
                if !self.retransmit_holding.is_empty() && self.ack_state == 0 {
                    if self.retry_counter > 0 {
                        // Peek, not pop: these bytes stay held until an ACK
                        // covering them arrives (`handle`'s ACK branch resets
                        // `retransmit_holding`), since they may need resending
                        // again next interval.
                        let mut chunk = [0u8; MAX_SEGMENT_PAYLOAD];
                        let n = self.retransmit_holding.peek_into(&mut chunk);
                        send_segment(device, arp, config, self, FLAG_ACK | FLAG_PSH, &chunk[..n]);
                        self.ack_state = TCP_RETRY_INTERVAL;
                        self.retry_counter -= 1;
                    } else {
                        self.state = TcpState::Unknown;
                    }
                } else if !self.send.is_empty() {
                    let mut chunk = [0u8; MAX_SEGMENT_PAYLOAD];
                    let n = self.send.pop_into(&mut chunk);
                    for &b in &chunk[..n] {
                        self.retransmit_holding.push(b);
                    }
                    send_segment(device, arp, config, self, FLAG_ACK | FLAG_PSH, &chunk[..n]);
                    self.seq_num = self.seq_num.wrapping_add(n as u32);
                    self.ack_state = TCP_RETRY_INTERVAL;
                    self.retry_counter = TCP_TOTAL_RETRIES;
                }
            }
            TcpState::FinWait1 => {
                self.close_wait_ticks += 1;
                if self.close_wait_ticks >= TCP_CLOSE_WAIT_TICKS {
                    self.state = TcpState::Unknown;
                }
            }
            _ => {}
        }
    }

    /// Handle an inbound TCP segment addressed to this socket. `source_ip`
    /// is the sender's IP (from the enclosing IPv4 header); `seg` is the
    /// segment (TCP header + data) with the IPv4 header stripped.
    pub fn handle<D: EthernetDevice>(
        &mut self,
        device: &mut D,
        arp: &mut ArpTable,
        config: &HostConfig,
        source_ip: Ipv4Addr,
        seg: &TcpSegment,
    ) {
        match self.state {
            TcpState::SynSent => {
                if self.local_port == seg.dest_port && seg.flags & (FLAG_SYN | FLAG_ACK) == (FLAG_SYN | FLAG_ACK) {
                    self.ack_num = seg.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    self.state = TcpState::Established;
                    log::debug!("tcp: port {} established (active open)", self.local_port);
                    send_segment(device, arp, config, self, FLAG_ACK, &[]);
                    self.recv.reset();
                    self.send.reset();
                    self.retransmit_holding.reset();
                    self.idle_ticks = 0;
                }
            }
            TcpState::Listen => {
                if self.local_port == seg.dest_port && seg.flags & FLAG_SYN != 0 {
                    self.remote_port = seg.source_port;
                    self.remote_ip = source_ip;
                    self.ack_num = seg.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    send_segment(device, arp, config, self, FLAG_SYN | FLAG_ACK, &[]);
                    self.seq_num = self.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    self.state = TcpState::Established;
                    log::debug!("tcp: port {} established (passive open)", self.local_port);
                    self.recv.reset();
                    self.send.reset();
                    self.retransmit_holding.reset();
                    self.idle_ticks = 0;
                }
            }
            TcpState::Established => {
                if self.remote_ip != source_ip || self.local_port != seg.dest_port || self.remote_port != seg.source_port {
                    return;
                }
                let mut should_ack = false;

                if seg.flags & FLAG_ACK != 0 && seg.ack_num == self.seq_num {
                    self.ack_state = 0;
                    self.retry_counter = 0;
                    self.retransmit_holding.reset();
                }
                if seg.flags & FLAG_SYN != 0 {
                    self.ack_num = seg.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    should_ack = true;
                }
                if !seg.data.is_empty() {
                    self.ack_num = seg.seq_num.wrapping_add(seg.data.len() as u32);
                    should_ack = true;
                    self.recv.push_slice(seg.data);
                }
                if seg.flags & FLAG_FIN != 0 {
                    self.ack_num = seg.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    send_segment(device, arp, config, self, FLAG_ACK | FLAG_FIN, &[]);
                    self.state = TcpState::Unknown;
                    return;
                }
                if should_ack {
                    send_segment(device, arp, config, self, FLAG_ACK, &[]);
                }
            }
            TcpState::FinWait1 => {
                if self.remote_ip == source_ip
                    && self.local_port == seg.dest_port
                    && self.remote_port == seg.source_port
                    && seg.flags & FLAG_FIN != 0
                {
                    self.ack_num = seg.seq_num.wrapping_add(1 + seg.data.len() as u32);
                    send_segment(device, arp, config, self, FLAG_ACK, &[]);
                    self.state = TcpState::Unknown;
                }
            }
            _ => {}
        }
    }
}

/// A parsed view over an inbound TCP segment (header already located past
/// the variable-length options area).
pub struct TcpSegment<'a> {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub data: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }
        let header_words = (data[12] >> 4) as usize;
        let header_len = header_words * 4;
        if header_len < TCP_HEADER_LEN || header_len > data.len() {
            return None;
        }
        Some(TcpSegment {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            dest_port: u16::from_be_bytes([data[2], data[3]]),
            seq_num: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack_num: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: data[13],
            data: &data[header_len..],
        })
    }
}

fn send_segment<D: EthernetDevice>(
    device: &mut D,
    arp: &mut ArpTable,
    config: &HostConfig,
    socket: &mut TcpSocket,
    flags: u8,
    payload: &[u8],
) {
    let mut buf = [0u8; TCP_TX_BUF_SIZE];
    let total = PSEUDO_HEADER_LEN + TCP_HEADER_LEN + payload.len();
    if total > buf.len() {
        return;
    }

    let segment_len = (TCP_HEADER_LEN + payload.len()) as u16;

    buf[0..4].copy_from_slice(config.local_ip.as_bytes());
    buf[4..8].copy_from_slice(socket.remote_ip.as_bytes());
    buf[8] = 0;
    buf[9] = ipv4::PROTO_TCP;
    buf[10..12].copy_from_slice(&segment_len.to_be_bytes());

    let h = PSEUDO_HEADER_LEN;
    buf[h..h + 2].copy_from_slice(&socket.local_port.to_be_bytes());
    buf[h + 2..h + 4].copy_from_slice(&socket.remote_port.to_be_bytes());
    buf[h + 4..h + 8].copy_from_slice(&socket.seq_num.to_be_bytes());
    buf[h + 8..h + 12].copy_from_slice(&socket.ack_num.to_be_bytes());
    buf[h + 12] = 5 << 4;
    buf[h + 13] = flags;

    let window = {
        let capacity = socket.recv.capacity() as u32;
        let occupied = socket.recv.len() as u32;
        let available = capacity.saturating_sub(occupied);
        let threshold = capacity * TCP_RX_BUF_MIN_NUM as u32 / TCP_RX_BUF_MIN_DEN as u32;
        if available < threshold {
            0
        } else {
            available.min(u16::MAX as u32) as u16
        }
    };
    socket.last_window_size = window;
    buf[h + 14..h + 16].copy_from_slice(&window.to_be_bytes());
    buf[h + 16] = 0;
    buf[h + 17] = 0;
    buf[h + 18] = 0;
    buf[h + 19] = 0;
    buf[h + TCP_HEADER_LEN..total].copy_from_slice(payload);

    let sum = checksum::checksum(&buf[..total]);
    buf[h + 16..h + 18].copy_from_slice(&sum.to_be_bytes());

    ipv4::send(device, arp, config, socket.remote_ip, ipv4::PROTO_TCP, &buf[h..total]);
}

/// Fixed table of TCP sockets (spec.md §4.6: "a small, fixed number of
/// connections, reserved up front by the application"). Grounded on
/// `examples/original_source/tcp.c`'s `sockets[MAX_TCP_SOCKETS]` plus
/// `tcp_reserveSocket`/`tcp_handle`'s linear scan-and-dispatch.
pub struct TcpTable<'a> {
    sockets: [Option<TcpSocket<'a>>; MAX_TCP_SOCKETS],
    sustaining: bool,
}

impl<'a> TcpTable<'a> {
    pub fn new() -> Self {
        TcpTable {
            sockets: core::array::from_fn(|_| None),
            sustaining: false,
        }
    }

    /// Reserve a socket with caller-supplied buffers. Returns `None` if
    /// every slot is already reserved.
    pub fn reserve(&mut self, recv_buf: &'a mut [u8], send_buf: &'a mut [u8], retransmit_buf: &'a mut [u8]) -> Option<usize> {
        let slot = self.sockets.iter().position(|s| s.is_none())?;
        self.sockets[slot] = Some(TcpSocket::new(recv_buf, send_buf, retransmit_buf));
        Some(slot)
    }

    pub fn release(&mut self, slot: usize) {
        if let Some(s) = self.sockets.get_mut(slot) {
            *s = None;
        }
    }

    pub fn socket(&mut self, slot: usize) -> Option<&mut TcpSocket<'a>> {
        self.sockets.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Advance every reserved socket by one tick (`tcp_sustain`'s per-socket
    /// loop). `tcp_sustain`'s reentrancy guard is kept as a flag even though
    /// `&mut self` already makes a real nested call impossible to express:
    /// it documents that a sustain-triggered-from-within-sustain call (e.g.
    /// a future caller invoking `tick` from a callback run during `tick`)
    /// is a silent no-op, not a second pass over the table.
    pub fn tick<D: EthernetDevice>(&mut self, device: &mut D, arp: &mut ArpTable, config: &HostConfig) {
        if self.sustaining {
            return;
        }
        self.sustaining = true;
        for socket in self.sockets.iter_mut().flatten() {
            socket.tick(device, arp, config);
        }
        self.sustaining = false;
    }

    /// Dispatch an inbound TCP segment to whichever reserved socket it
    /// belongs to. First match wins, mirroring `tcp_handle`'s scan: a
    /// `SynSent` or `Listen` socket matches by local port alone; an
    /// `Established`/`FinWait1` socket matches the full source/port triple.
    pub fn handle<D: EthernetDevice>(
        &mut self,
        device: &mut D,
        arp: &mut ArpTable,
        config: &HostConfig,
        source_ip: Ipv4Addr,
        seg: &TcpSegment,
    ) -> bool {
        for socket in self.sockets.iter_mut().flatten() {
            let matches = match socket.state {
                TcpState::SynSent | TcpState::Listen => socket.local_port == seg.dest_port,
                TcpState::Established | TcpState::FinWait1 => {
                    socket.remote_ip == source_ip && socket.local_port == seg.dest_port && socket.remote_port == seg.source_port
                }
                _ => false,
            };
            if matches {
                socket.handle(device, arp, config, source_ip, seg);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MacAddr;
    use std::vec::Vec;

    struct RecordingDevice {
        sent: Vec<Vec<u8>>,
    }
    impl EthernetDevice for RecordingDevice {
        fn send_frame(&mut self, _dst_mac: MacAddr, _ethertype: u16, payload: &[u8]) {
            self.sent.push(payload.to_vec());
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

    fn new_socket<'a>(recv: &'a mut [u8], send: &'a mut [u8], hold: &'a mut [u8]) -> TcpSocket<'a> {
        TcpSocket::new(recv, send, hold)
    }

    #[test]
    fn seq_num_wraps() {
        let mut recv = [0u8; 32];
        let mut send = [0u8; 32];
        let mut hold = [0u8; 32];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.seq_num = u32::MAX - 2;
        socket.seq_num = socket.seq_num.wrapping_add(5);
        assert_eq!(socket.seq_num, 2);
    }

    #[test]
    fn listen_then_syn_establishes() {
        let cfg = config();
        let mut arp = ArpTable::new();
        arp.learn(Ipv4Addr::new(192, 168, 2, 1), MacAddr::new([9; 6]));
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 64];
        let mut send = [0u8; 64];
        let mut hold = [0u8; 64];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.listen(7000);

        let mut raw = [0u8; TCP_HEADER_LEN];
        raw[2..4].copy_from_slice(&7000u16.to_be_bytes());
        raw[12] = 5 << 4;
        raw[13] = FLAG_SYN;
        let seg = TcpSegment::parse(&raw).unwrap();

        socket.handle(&mut dev, &mut arp, &cfg, Ipv4Addr::new(192, 168, 2, 1), &seg);

        assert_eq!(socket.state(), TcpState::Established);
        assert_eq!(dev.sent.len(), 1);
        let reply = ipv4::Ipv4Packet::parse(&dev.sent[0]).unwrap();
        assert_eq!(reply.protocol, ipv4::PROTO_TCP);
        assert!(checksum::verify(&{
            let mut full = Vec::new();
            full.extend_from_slice(config().local_ip.as_bytes());
            full.extend_from_slice(Ipv4Addr::new(192, 168, 2, 1).as_bytes());
            full.push(0);
            full.push(ipv4::PROTO_TCP);
            full.extend_from_slice(&(reply.payload.len() as u16).to_be_bytes());
            full.extend_from_slice(reply.payload);
            full
        }));
    }

    #[test]
    fn write_then_drain_on_tick() {
        let cfg = config();
        let mut arp = ArpTable::new();
        let peer = Ipv4Addr::new(192, 168, 2, 1);
        arp.learn(peer, MacAddr::new([9; 6]));
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 64];
        let mut send = [0u8; 64];
        let mut hold = [0u8; 64];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.state = TcpState::Established;
        socket.remote_ip = peer;
        socket.remote_port = 80;
        socket.local_port = 1024;

        for &b in b"hi" {
            assert!(socket.try_write_byte(b));
        }
        socket.tick(&mut dev, &mut arp, &cfg);

        assert_eq!(dev.sent.len(), 1);
        assert_eq!(socket.seq_num, 2);
        assert!(!socket.retransmit_holding.is_empty());
    }

    #[test]
    fn fin_wait_closes_after_timeout() {
        let cfg = config();
        let mut arp = ArpTable::new();
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 16];
        let mut send = [0u8; 16];
        let mut hold = [0u8; 16];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.remote_ip = Ipv4Addr::new(192, 168, 2, 1);
        socket.disconnect(&mut dev, &mut arp, &cfg);
        assert_eq!(socket.state(), TcpState::FinWait1);
        for _ in 0..TCP_CLOSE_WAIT_TICKS {
            socket.tick(&mut dev, &mut arp, &cfg);
        }
        assert_eq!(socket.state(), TcpState::Unknown);
    }

    #[test]
    fn receive_timeout_ends_stream() {
        let cfg = config();
        let mut arp = ArpTable::new();
        arp.learn(Ipv4Addr::new(192, 168, 2, 1), MacAddr::new([9; 6]));
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 16];
        let mut send = [0u8; 16];
        let mut hold = [0u8; 16];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.remote_ip = Ipv4Addr::new(192, 168, 2, 1);
        socket.state = TcpState::Established;
        socket.set_timeout(5);

        for _ in 0..4 {
            socket.tick(&mut dev, &mut arp, &cfg);
            assert_eq!(socket.state(), TcpState::Established);
        }
        socket.tick(&mut dev, &mut arp, &cfg);
        assert_eq!(socket.state(), TcpState::Unknown);
        assert_eq!(socket.try_read_byte(&mut dev, &mut arp, &cfg), None);
    }

    #[test]
    fn receive_timeout_resets_when_data_arrives() {
        let cfg = config();
        let mut arp = ArpTable::new();
        arp.learn(Ipv4Addr::new(192, 168, 2, 1), MacAddr::new([9; 6]));
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 16];
        let mut send = [0u8; 16];
        let mut hold = [0u8; 16];
        let mut socket = new_socket(&mut recv, &mut send, &mut hold);
        socket.remote_ip = Ipv4Addr::new(192, 168, 2, 1);
        socket.state = TcpState::Established;
        socket.set_timeout(3);

        socket.tick(&mut dev, &mut arp, &cfg);
        socket.tick(&mut dev, &mut arp, &cfg);
        socket.recv.push(b'x');
        socket.tick(&mut dev, &mut arp, &cfg);
        socket.tick(&mut dev, &mut arp, &cfg);
        assert_eq!(socket.state(), TcpState::Established);
    }

    #[test]
    fn table_dispatches_to_listening_socket() {
        let cfg = config();
        let mut arp = ArpTable::new();
        arp.learn(Ipv4Addr::new(192, 168, 2, 1), MacAddr::new([9; 6]));
        let mut dev = RecordingDevice { sent: Vec::new() };
        let mut recv = [0u8; 64];
        let mut send = [0u8; 64];
        let mut hold = [0u8; 64];
        let mut table = TcpTable::new();
        let slot = table.reserve(&mut recv, &mut send, &mut hold).unwrap();
        table.socket(slot).unwrap().listen(7000);

        let mut raw = [0u8; TCP_HEADER_LEN];
        raw[2..4].copy_from_slice(&7000u16.to_be_bytes());
        raw[12] = 5 << 4;
        raw[13] = FLAG_SYN;
        let seg = TcpSegment::parse(&raw).unwrap();

        assert!(table.handle(&mut dev, &mut arp, &cfg, Ipv4Addr::new(192, 168, 2, 1), &seg));
        assert_eq!(table.socket(slot).unwrap().state(), TcpState::Established);
    }
}
