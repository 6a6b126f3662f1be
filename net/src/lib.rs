//! Single-interface IPv4 protocol engine for a small Ethernet board.
//!
//! The stack answers ARP, ICMP echo, a UDP service and a single TCP
//! connection, and acquires its address with DHCP.  It owns one packet
//! buffer: every frame is received into it, classified in place and, where a
//! reply is due, rewritten into the reply before transmission.
//!
//! Hardware, persistent storage and the seconds timer are reached through
//! the [`NetDevice`], [`ConfigStore`] and [`Scheduler`] traits; the board
//! drives everything through [`NetStack::poll`] and [`NetStack::execute`].

#![cfg_attr(not(test), no_std)]

pub mod arp;
pub mod checksum;
pub mod config;
pub mod console;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod netdev;
pub mod netstack;
pub mod packetbuf;
pub mod stats;
pub mod tcp;
pub mod tcp_responder;
pub mod timer;
pub mod types;
pub mod udp;

#[cfg(test)]
mod testutil;

pub use config::{AddressConfig, AddressField, ConfigSlot, ConfigStore, RamStore, StackConfig};
pub use console::{Command, ConsoleError, DhcpCommand};
pub use netdev::NetDevice;
pub use netstack::{CommandOutcome, NetStack, PollEvents};
pub use packetbuf::PacketBuffer;
pub use stats::NetStats;
pub use timer::{NetTimers, Scheduler, TimerEvents, TimerKind};
pub use types::{Ipv4Addr, MacAddr, NetError, NetResult};

// =============================================================================
// Ethernet
// =============================================================================

pub const ETH_ADDR_LEN: usize = 6;
pub const ETH_HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

// =============================================================================
// ARP
// =============================================================================

pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_PTYPE_IPV4: u16 = 0x0800;
pub const ARP_HLEN_ETHERNET: u8 = 6;
pub const ARP_PLEN_IPV4: u8 = 4;
pub const ARP_OPER_REQUEST: u16 = 1;
pub const ARP_OPER_REPLY: u16 = 2;

pub const ARP_HEADER_LEN: usize = 28;
/// Ethernet header plus ARP body, no padding.
pub const ARP_FRAME_LEN: usize = ETH_HEADER_LEN + ARP_HEADER_LEN;

// =============================================================================
// IPv4 and transports
// =============================================================================

pub const IPV4_HEADER_LEN: usize = 20;
pub const DEFAULT_TTL: u8 = 64;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_HEADER_LEN: usize = 8;

pub const UDP_HEADER_LEN: usize = 8;
pub const TCP_HEADER_LEN: usize = 20;
