//! Build-time configuration.
//!
//! Mirrors `examples/original_source/config.h`: table sizes and buffer sizes are
//! `pub const` rather than runtime parameters, so the footprint of the whole
//! stack is known at compile time. Integrators who need different sizes fork
//! these values (there is no const-generic knob here, matching the source
//! crate's own plain-constant style).

/// Maximum number of simultaneously tracked ARP entries.
pub const MAX_ARP_ENTRIES: usize = 16;

/// Maximum number of UDP sockets.
pub const MAX_UDP_SOCKETS: usize = 16;

/// Maximum number of TCP sockets.
pub const MAX_TCP_SOCKETS: usize = 4;

/// Size of the scratch buffer used to assemble outbound IPv4 datagrams.
pub const IP_TX_BUF_SIZE: usize = 256;

/// Size of the scratch buffer used to assemble outbound TCP segments,
/// including the 12-byte pseudo-header prefix and 20-byte TCP header.
pub const TCP_TX_BUF_SIZE: usize = 220;

/// Size of the scratch buffer used to assemble outbound UDP datagrams,
/// including the 12-byte pseudo-header prefix.
pub const UDP_TX_BUF_SIZE: usize = 256;

/// Ticks an ARP resolution is allowed to wait before the caller should give
/// up (see `ArpTable::resolve`).
pub const ARP_RESOLVE_TIMEOUT_TICKS: u16 = 40;

/// Ticks a freshly resolved or refreshed ARP entry stays valid for.
pub const ARP_ENTRY_LIFETIME_TICKS: u16 = 600;

/// Number of times a TCP socket retransmits an unacknowledged window (or a
/// SYN) before giving up and moving to `Unknown`.
pub const TCP_TOTAL_RETRIES: u8 = 2;

/// Ticks between TCP retransmission attempts.
pub const TCP_RETRY_INTERVAL: u16 = 1000;

/// Fraction (of the receive FIFO's own capacity) below which the advertised
/// TCP receive window is clamped to zero, expressed as a ratio so the crate
/// never needs floating point: window is clamped when
/// `available * TCP_RX_BUF_MIN_DEN < recv_capacity * TCP_RX_BUF_MIN_NUM`
/// (see DESIGN.md's Open Question note on why this is the receive buffer's
/// own capacity, not the send buffer's).
pub const TCP_RX_BUF_MIN_NUM: u32 = 1;
pub const TCP_RX_BUF_MIN_DEN: u32 = 2;

/// Ticks a blocking `disconnect`/`flush` is willing to wait for the peer.
pub const TCP_CLOSE_WAIT_TICKS: u16 = 100;
