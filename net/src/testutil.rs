//! Frame fixtures and a loopback device for host tests.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::dhcp::{
    MAGIC_COOKIE, OPTION_DNS, OPTION_END, OPTION_LEASE_TIME, OPTION_MSG_TYPE, OPTION_ROUTER,
    OPTION_SERVER_ID, OPTION_SUBNET_MASK, UDP_PORT_CLIENT, UDP_PORT_SERVER,
};
use crate::icmp::IcmpEcho;
use crate::netdev::NetDevice;
use crate::packetbuf::PacketBuffer;
use crate::tcp::{DEFAULT_WINDOW_SIZE, TcpControl, TcpSegment};
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{
    ETH_HEADER_LEN, ETHERTYPE_IPV4, ICMP_ECHO_REQUEST, ICMP_HEADER_LEN, IPPROTO_ICMP, IPPROTO_TCP,
    IPPROTO_UDP, IPV4_HEADER_LEN, TCP_HEADER_LEN, UDP_HEADER_LEN,
};
use crate::{arp, ethernet, ipv4, udp};

pub const LOCAL_MAC: MacAddr = MacAddr([2, 3, 4, 5, 6, 136]);
pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 199);
pub const PEER_MAC: MacAddr = MacAddr([0x10, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 198);
pub const SERVER_MAC: MacAddr = MacAddr([0x10, 0x00, 0x00, 0x00, 0x00, 0xfe]);
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const DNS_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

const L4: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;

/// Finish a frame whose transport segment (`l4_len` bytes) is already in
/// place behind the IP header.
fn wrap_ipv4(
    buf: &mut PacketBuffer,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    l4_len: usize,
) {
    let s = buf.storage_mut();
    ipv4::write_header(&mut s[ETH_HEADER_LEN..], src_ip, dst_ip, protocol, l4_len).unwrap();
    ethernet::write_header(s, dst_mac, src_mac, ETHERTYPE_IPV4).unwrap();
    buf.set_len(L4 + l4_len).unwrap();
}

#[allow(clippy::too_many_arguments)]
pub fn udp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> PacketBuffer {
    let mut buf = PacketBuffer::new();
    let s = buf.storage_mut();
    s[L4 + UDP_HEADER_LEN..L4 + UDP_HEADER_LEN + payload.len()].copy_from_slice(payload);
    let len = udp::write_header(&mut s[L4..], src_ip, dst_ip, src_port, dst_port, payload.len()).unwrap();
    wrap_ipv4(&mut buf, src_mac, dst_mac, src_ip, dst_ip, IPPROTO_UDP, len);
    buf
}

/// UDP datagram from the peer's MAC.
pub fn udp_datagram(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> PacketBuffer {
    udp_frame(PEER_MAC, LOCAL_MAC, src_ip, dst_ip, src_port, dst_port, payload)
}

/// ICMP echo request from the peer to the local address.
pub fn echo_request(ident: u16, seq: u16, data: &[u8]) -> PacketBuffer {
    let mut buf = PacketBuffer::new();
    let len = ICMP_HEADER_LEN + data.len();
    let icmp = &mut buf.storage_mut()[L4..L4 + len];
    icmp[0] = ICMP_ECHO_REQUEST;
    icmp[1] = 0;
    icmp[4..6].copy_from_slice(&ident.to_be_bytes());
    icmp[6..8].copy_from_slice(&seq.to_be_bytes());
    icmp[ICMP_HEADER_LEN..].copy_from_slice(data);
    IcmpEcho::new_checked(icmp).unwrap().fill_checksum();
    wrap_ipv4(&mut buf, PEER_MAC, LOCAL_MAC, PEER_IP, LOCAL_IP, IPPROTO_ICMP, len);
    buf
}

/// TCP segment from the peer to the local address.
pub fn tcp_segment(
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpControl,
    payload: &[u8],
) -> PacketBuffer {
    let mut buf = PacketBuffer::new();
    let len = TCP_HEADER_LEN + payload.len();
    let raw = &mut buf.storage_mut()[L4..L4 + len];
    raw[TCP_HEADER_LEN..].copy_from_slice(payload);
    raw[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
    let mut seg = TcpSegment::new_checked(raw).unwrap();
    seg.set_src_port(src_port);
    seg.set_dst_port(dst_port);
    seg.set_seq_number(seq);
    seg.set_ack_number(ack);
    seg.set_offset_and_control(TCP_HEADER_LEN, flags);
    seg.set_window(DEFAULT_WINDOW_SIZE);
    seg.clear_urgent();
    seg.fill_checksum(PEER_IP, LOCAL_IP);
    wrap_ipv4(&mut buf, PEER_MAC, LOCAL_MAC, PEER_IP, LOCAL_IP, IPPROTO_TCP, len);
    buf
}

/// Broadcast who-has from the peer.
pub fn arp_request(target: Ipv4Addr) -> PacketBuffer {
    let mut buf = PacketBuffer::new();
    arp::build_request(&mut buf, PEER_MAC, PEER_IP, target).unwrap();
    buf
}

/// Server reply broadcast to the client port.  `options` is the raw option
/// area, end marker included.
pub fn dhcp_frame(xid: u32, yiaddr: Ipv4Addr, options: &[u8]) -> PacketBuffer {
    let mut msg = vec![0u8; 240];
    msg[0] = 2;
    msg[1] = 1;
    msg[2] = 6;
    msg[4..8].copy_from_slice(&xid.to_be_bytes());
    msg[16..20].copy_from_slice(yiaddr.as_bytes());
    msg[28..34].copy_from_slice(LOCAL_MAC.as_bytes());
    msg[236..240].copy_from_slice(&MAGIC_COOKIE);
    msg.extend_from_slice(options);
    udp_frame(
        SERVER_MAC,
        MacAddr::BROADCAST,
        SERVER_IP,
        Ipv4Addr::BROADCAST,
        UDP_PORT_SERVER,
        UDP_PORT_CLIENT,
        &msg,
    )
}

/// A typical OFFER/ACK: server id, router and DNS from this subnet, a /24
/// mask and, when given, a lease time.
pub fn dhcp_reply(msg_type: u8, xid: u32, yiaddr: Ipv4Addr, lease: Option<u32>) -> PacketBuffer {
    let mut opts = vec![OPTION_MSG_TYPE, 1, msg_type];
    opts.extend_from_slice(&[OPTION_SERVER_ID, 4]);
    opts.extend_from_slice(SERVER_IP.as_bytes());
    if let Some(secs) = lease {
        opts.extend_from_slice(&[OPTION_LEASE_TIME, 4]);
        opts.extend_from_slice(&secs.to_be_bytes());
    }
    opts.extend_from_slice(&[OPTION_SUBNET_MASK, 4, 255, 255, 255, 0]);
    opts.extend_from_slice(&[OPTION_ROUTER, 4]);
    opts.extend_from_slice(SERVER_IP.as_bytes());
    opts.extend_from_slice(&[OPTION_DNS, 4]);
    opts.extend_from_slice(DNS_IP.as_bytes());
    opts.push(OPTION_END);
    dhcp_frame(xid, yiaddr, &opts)
}

// =============================================================================
// MockDevice
// =============================================================================

/// In-memory controller: frames pushed to `rx` are received in order, sent
/// frames collect in `tx`.
#[derive(Debug)]
pub struct MockDevice {
    pub rx: VecDeque<Vec<u8>>,
    pub tx: Vec<Vec<u8>>,
    pub link: bool,
    pub overflow: bool,
    pub fail_tx: bool,
    /// Fail this many transmissions, then recover.
    pub fail_next: usize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            link: true,
            overflow: false,
            fail_tx: false,
            fail_next: 0,
        }
    }

    pub fn inject(&mut self, buf: &PacketBuffer) {
        self.rx.push_back(buf.frame().to_vec());
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.tx)
    }
}

impl NetDevice for MockDevice {
    fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.rx.pop_front() {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                len
            }
            None => 0,
        }
    }

    fn transmit(&mut self, frame: &[u8]) -> NetResult {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(NetError::TransmitFailed);
        }
        if self.fail_tx {
            return Err(NetError::TransmitFailed);
        }
        self.tx.push(frame.to_vec());
        Ok(())
    }

    fn link_up(&self) -> bool {
        self.link
    }

    fn overflow_pending(&mut self) -> bool {
        core::mem::take(&mut self.overflow)
    }
}
