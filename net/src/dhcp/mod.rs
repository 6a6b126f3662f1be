//! DHCP client (RFC 2131/2132): message framing and the client state machine.
//!
//! A DHCP message is the UDP payload between ports 67 and 68: a 236-byte
//! fixed BOOTP section, the 4-byte magic cookie, then the option area.

pub mod client;
pub mod options;

use picoeth_lib::klog_trace;

pub use client::{DhcpActions, DhcpSession, DhcpState};
pub use options::{OptionValue, OptionWriter, find_option, option_addr, option_u8, option_u32};

use crate::ethernet::{self, EthernetFrame};
use crate::packetbuf::PacketBuffer;
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{ETH_HEADER_LEN, ETHERTYPE_IPV4, IPPROTO_UDP, IPV4_HEADER_LEN, UDP_HEADER_LEN};
use crate::{ipv4, udp};

pub const UDP_PORT_SERVER: u16 = 67;
pub const UDP_PORT_CLIENT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
pub const FLAGS_BROADCAST: u16 = 0x8000;
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP section plus the magic cookie.
pub const BOOTP_HEADER_LEN: usize = 240;

pub const OPTION_PAD: u8 = 0;
pub const OPTION_SUBNET_MASK: u8 = 1;
pub const OPTION_TIME_OFFSET: u8 = 2;
pub const OPTION_ROUTER: u8 = 3;
pub const OPTION_DNS: u8 = 6;
pub const OPTION_REQUESTED_IP: u8 = 50;
pub const OPTION_LEASE_TIME: u8 = 51;
pub const OPTION_MSG_TYPE: u8 = 53;
pub const OPTION_SERVER_ID: u8 = 54;
pub const OPTION_PARAM_REQ_LIST: u8 = 55;
pub const OPTION_RENEWAL_TIME: u8 = 58;
pub const OPTION_REBINDING_TIME: u8 = 59;
pub const OPTION_CLIENT_ID: u8 = 61;
pub const OPTION_END: u8 = 255;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_DECLINE: u8 = 4;
pub const MSG_ACK: u8 = 5;
pub const MSG_NAK: u8 = 6;
pub const MSG_RELEASE: u8 = 7;

/// Parameters asked for in every client message.
const PARAM_REQUEST_LIST: [u8; 5] = [
    OPTION_SUBNET_MASK,
    OPTION_TIME_OFFSET,
    OPTION_ROUTER,
    OPTION_DNS,
    OPTION_LEASE_TIME,
];

mod field {
    use core::ops::Range;

    pub const OP: usize = 0;
    pub const HTYPE: usize = 1;
    pub const HLEN: usize = 2;
    pub const XID: Range<usize> = 4..8;
    pub const FLAGS: Range<usize> = 10..12;
    pub const CIADDR: Range<usize> = 12..16;
    pub const YIADDR: Range<usize> = 16..20;
    pub const CHADDR: Range<usize> = 28..34;
    pub const COOKIE: Range<usize> = 236..240;
}

// =============================================================================
// DhcpPacket view
// =============================================================================

/// Typed view over a DHCP message (the UDP payload).
#[derive(Debug)]
pub struct DhcpPacket<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> DhcpPacket<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        if buffer.as_ref().len() < BOOTP_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    #[inline]
    pub fn op(&self) -> u8 {
        self.buffer.as_ref()[field::OP]
    }

    #[inline]
    pub fn xid(&self) -> u32 {
        let b = &self.buffer.as_ref()[field::XID];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    #[inline]
    pub fn flags(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::FLAGS];
        u16::from_be_bytes([b[0], b[1]])
    }

    #[inline]
    pub fn ciaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::CIADDR])
    }

    #[inline]
    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::YIADDR])
    }

    #[inline]
    pub fn chaddr(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::CHADDR])
    }

    #[inline]
    pub fn has_magic_cookie(&self) -> bool {
        self.buffer.as_ref()[field::COOKIE] == MAGIC_COOKIE
    }

    #[inline]
    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[BOOTP_HEADER_LEN..]
    }

    pub fn message_type(&self) -> Option<u8> {
        option_u8(self.options(), OPTION_MSG_TYPE)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> DhcpPacket<T> {
    /// Zero the fixed section and write a BOOTREQUEST header for `mac`.
    pub fn init_request(&mut self, mac: MacAddr, xid: u32, flags: u16, ciaddr: Ipv4Addr) {
        let b = self.buffer.as_mut();
        b[..BOOTP_HEADER_LEN].fill(0);
        b[field::OP] = BOOTREQUEST;
        b[field::HTYPE] = HTYPE_ETHERNET;
        b[field::HLEN] = HLEN_ETHERNET;
        b[field::XID].copy_from_slice(&xid.to_be_bytes());
        b[field::FLAGS].copy_from_slice(&flags.to_be_bytes());
        b[field::CIADDR].copy_from_slice(ciaddr.as_bytes());
        b[field::CHADDR].copy_from_slice(mac.as_bytes());
        b[field::COOKIE].copy_from_slice(&MAGIC_COOKIE);
    }

    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[BOOTP_HEADER_LEN..]
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Server reply fields the client acts on.  Absent options stay `None`; the
/// state machine decides which of them are mandatory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpReply {
    pub message_type: u8,
    pub yiaddr: Ipv4Addr,
    pub server_id: Option<Ipv4Addr>,
    /// Ethernet source of the reply, used to unicast RENEW and RELEASE.
    pub server_mac: MacAddr,
    pub lease_secs: Option<u32>,
    pub renewal_secs: Option<u32>,
    pub rebinding_secs: Option<u32>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

/// `true` if the (UDP-validated) frame travels from the server port to the
/// client port.  The destination address is not checked: renewal ACKs
/// arrive unicast.
pub fn is_dhcp_reply(frame: &[u8]) -> bool {
    udp::datagram(frame).is_some_and(|(_, _, u)| {
        u.src_port() == UDP_PORT_SERVER && u.dst_port() == UDP_PORT_CLIENT
    })
}

/// Parse a server reply addressed to `mac` within transaction `xid`.
pub fn parse_reply(frame: &[u8], mac: MacAddr, xid: u32) -> Option<DhcpReply> {
    let server_mac = EthernetFrame::new_checked(frame).ok()?.src_addr();
    let (_, _, datagram) = udp::datagram(frame)?;
    if datagram.src_port() != UDP_PORT_SERVER || datagram.dst_port() != UDP_PORT_CLIENT {
        return None;
    }
    let msg = DhcpPacket::new_checked(datagram.payload()).ok()?;
    if msg.op() != BOOTREPLY || !msg.has_magic_cookie() {
        return None;
    }
    if msg.chaddr() != mac || msg.xid() != xid {
        klog_trace!("dhcp: reply for another client or transaction ignored");
        return None;
    }
    let opts = msg.options();
    Some(DhcpReply {
        message_type: msg.message_type()?,
        yiaddr: msg.yiaddr(),
        server_id: option_addr(opts, OPTION_SERVER_ID),
        server_mac,
        lease_secs: option_u32(opts, OPTION_LEASE_TIME),
        renewal_secs: option_u32(opts, OPTION_RENEWAL_TIME),
        rebinding_secs: option_u32(opts, OPTION_REBINDING_TIME),
        subnet_mask: option_addr(opts, OPTION_SUBNET_MASK),
        router: option_addr(opts, OPTION_ROUTER),
        dns: option_addr(opts, OPTION_DNS),
    })
}

// =============================================================================
// Outbound
// =============================================================================

/// Client messages.  RENEW and REBIND are REQUESTs sent in the RENEWING and
/// REBINDING states; they differ only in addressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpRequestKind {
    Discover,
    Request,
    Decline,
    Renew,
    Rebind,
    Release,
}

impl DhcpRequestKind {
    /// Value of option 53 on the wire.
    pub const fn message_type(self) -> u8 {
        match self {
            Self::Discover => MSG_DISCOVER,
            Self::Request | Self::Renew | Self::Rebind => MSG_REQUEST,
            Self::Decline => MSG_DECLINE,
            Self::Release => MSG_RELEASE,
        }
    }

    /// RENEW and RELEASE go straight to the server; everything else is
    /// broadcast.
    pub const fn is_unicast(self) -> bool {
        matches!(self, Self::Renew | Self::Release)
    }

    /// Messages sent while holding an address carry it in `ciaddr`.
    pub const fn uses_ciaddr(self) -> bool {
        matches!(self, Self::Renew | Self::Rebind | Self::Release)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Discover => "DISCOVER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Renew => "RENEW",
            Self::Rebind => "REBIND",
            Self::Release => "RELEASE",
        }
    }
}

/// Everything needed to build one client message, captured from the
/// session and the address configuration at send time.
#[derive(Clone, Copy, Debug)]
pub struct DhcpOutbound {
    pub kind: DhcpRequestKind,
    pub mac: MacAddr,
    pub xid: u32,
    /// Address currently in use.
    pub client_ip: Ipv4Addr,
    /// Offered (REQUEST) or rejected (DECLINE) address.
    pub requested_ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
    pub server_mac: MacAddr,
    /// Lease time echoed from the OFFER.
    pub lease_secs: u32,
}

/// Build `out` from scratch in `buf`.  Returns the frame length.
pub fn build_message(buf: &mut PacketBuffer, out: &DhcpOutbound) -> NetResult<usize> {
    let kind = out.kind;
    let (eth_dst, ip_dst, flags) = if kind.is_unicast() {
        (out.server_mac, out.server_ip, 0)
    } else {
        (MacAddr::BROADCAST, Ipv4Addr::BROADCAST, FLAGS_BROADCAST)
    };
    let (ip_src, ciaddr) = if kind.uses_ciaddr() {
        (out.client_ip, out.client_ip)
    } else {
        (Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)
    };

    let ip_start = ETH_HEADER_LEN;
    let udp_start = ip_start + IPV4_HEADER_LEN;
    let dhcp_start = udp_start + UDP_HEADER_LEN;

    let storage = buf.storage_mut();
    let dhcp_len = {
        let mut msg = DhcpPacket::new_checked(&mut storage[dhcp_start..])?;
        msg.init_request(out.mac, out.xid, flags, ciaddr);

        let mut client_id: [u8; 7] = [HTYPE_ETHERNET, 0, 0, 0, 0, 0, 0];
        client_id[1..].copy_from_slice(out.mac.as_bytes());

        let mut w = OptionWriter::new(msg.options_mut());
        w.put(OPTION_MSG_TYPE, &OptionValue::from_u8(kind.message_type())?)?;
        w.put(OPTION_PARAM_REQ_LIST, &OptionValue::from_slice(&PARAM_REQUEST_LIST)?)?;
        w.put(OPTION_CLIENT_ID, &OptionValue::from_slice(&client_id)?)?;
        match kind {
            DhcpRequestKind::Request => {
                w.put(OPTION_REQUESTED_IP, &OptionValue::from_addr(out.requested_ip)?)?;
                w.put(OPTION_LEASE_TIME, &OptionValue::from_u32(out.lease_secs)?)?;
                w.put(OPTION_SERVER_ID, &OptionValue::from_addr(out.server_ip)?)?;
            }
            DhcpRequestKind::Decline => {
                w.put(OPTION_REQUESTED_IP, &OptionValue::from_addr(out.requested_ip)?)?;
                w.put(OPTION_SERVER_ID, &OptionValue::from_addr(out.server_ip)?)?;
            }
            DhcpRequestKind::Release => {
                w.put(OPTION_SERVER_ID, &OptionValue::from_addr(out.server_ip)?)?;
            }
            DhcpRequestKind::Discover | DhcpRequestKind::Renew | DhcpRequestKind::Rebind => {}
        }
        BOOTP_HEADER_LEN + w.finish()?
    };

    udp::write_header(
        &mut storage[udp_start..],
        ip_src,
        ip_dst,
        UDP_PORT_CLIENT,
        UDP_PORT_SERVER,
        dhcp_len,
    )?;
    ipv4::write_header(
        &mut storage[ip_start..],
        ip_src,
        ip_dst,
        IPPROTO_UDP,
        UDP_HEADER_LEN + dhcp_len,
    )?;
    ethernet::write_header(storage, eth_dst, out.mac, ETHERTYPE_IPV4)?;

    let len = dhcp_start + dhcp_len;
    buf.set_len(len)?;
    Ok(len)
}
