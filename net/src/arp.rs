//! ARP (RFC 826) for Ethernet + IPv4.
//!
//! The stack never keeps a neighbor cache: it answers requests for its own
//! address, announces itself with a gratuitous ARP after DHCP assigns an
//! address, and watches ARP traffic for a competing owner of that address.

use picoeth_lib::klog_debug;

use crate::ethernet::{self, EthernetFrame};
use crate::packetbuf::PacketBuffer;
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{
    ARP_FRAME_LEN, ARP_HEADER_LEN, ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY,
    ARP_OPER_REQUEST, ARP_PLEN_IPV4, ARP_PTYPE_IPV4, ETH_HEADER_LEN, ETHERTYPE_ARP,
};

mod field {
    use core::ops::Range;

    pub const HTYPE: Range<usize> = 0..2;
    pub const PTYPE: Range<usize> = 2..4;
    pub const HLEN: usize = 4;
    pub const PLEN: usize = 5;
    pub const OPER: Range<usize> = 6..8;
    pub const SHA: Range<usize> = 8..14;
    pub const SPA: Range<usize> = 14..18;
    pub const THA: Range<usize> = 18..24;
    pub const TPA: Range<usize> = 24..28;
}

/// Typed view over an ARP packet (the Ethernet payload).
#[derive(Debug)]
pub struct ArpPacket<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> ArpPacket<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        if buffer.as_ref().len() < ARP_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    fn read_u16(&self, range: core::ops::Range<usize>) -> u16 {
        let b = &self.buffer.as_ref()[range];
        u16::from_be_bytes([b[0], b[1]])
    }

    /// `true` for the Ethernet/IPv4 flavour, the only one this stack speaks.
    pub fn is_ethernet_ipv4(&self) -> bool {
        let b = self.buffer.as_ref();
        self.read_u16(field::HTYPE) == ARP_HTYPE_ETHERNET
            && self.read_u16(field::PTYPE) == ARP_PTYPE_IPV4
            && b[field::HLEN] == ARP_HLEN_ETHERNET
            && b[field::PLEN] == ARP_PLEN_IPV4
    }

    #[inline]
    pub fn operation(&self) -> u16 {
        self.read_u16(field::OPER)
    }

    #[inline]
    pub fn sender_hardware_addr(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::SHA])
    }

    #[inline]
    pub fn sender_protocol_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::SPA])
    }

    #[inline]
    pub fn target_hardware_addr(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::THA])
    }

    #[inline]
    pub fn target_protocol_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::TPA])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> ArpPacket<T> {
    /// Fill the fixed Ethernet/IPv4 type and length fields.
    pub fn set_ethernet_ipv4(&mut self) {
        let b = self.buffer.as_mut();
        b[field::HTYPE].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        b[field::PTYPE].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        b[field::HLEN] = ARP_HLEN_ETHERNET;
        b[field::PLEN] = ARP_PLEN_IPV4;
    }

    #[inline]
    pub fn set_operation(&mut self, oper: u16) {
        self.buffer.as_mut()[field::OPER].copy_from_slice(&oper.to_be_bytes());
    }

    #[inline]
    pub fn set_sender(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        let b = self.buffer.as_mut();
        b[field::SHA].copy_from_slice(mac.as_bytes());
        b[field::SPA].copy_from_slice(ip.as_bytes());
    }

    #[inline]
    pub fn set_target(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        let b = self.buffer.as_mut();
        b[field::THA].copy_from_slice(mac.as_bytes());
        b[field::TPA].copy_from_slice(ip.as_bytes());
    }
}

fn arp_view(frame: &[u8]) -> Option<ArpPacket<&[u8]>> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != ETHERTYPE_ARP {
        return None;
    }
    let arp = ArpPacket::new_checked(&frame[ETH_HEADER_LEN..]).ok()?;
    if !arp.is_ethernet_ipv4() {
        return None;
    }
    Some(arp)
}

// =============================================================================
// Classification
// =============================================================================

/// `true` if `frame` is an ARP request asking for `local_ip`.
pub fn is_request_for(frame: &[u8], local_ip: Ipv4Addr) -> bool {
    if local_ip.is_unspecified() {
        return false;
    }
    match arp_view(frame) {
        Some(arp) => arp.operation() == ARP_OPER_REQUEST && arp.target_protocol_addr() == local_ip,
        None => false,
    }
}

/// `true` if `frame` shows another host using `candidate`.
///
/// Any ARP request or reply whose sender protocol address is `candidate` and
/// whose sender hardware address is not `local_mac` counts.
pub fn is_conflict(frame: &[u8], candidate: Ipv4Addr, local_mac: MacAddr) -> bool {
    if candidate.is_unspecified() {
        return false;
    }
    match arp_view(frame) {
        Some(arp) => {
            let conflict = arp.sender_protocol_addr() == candidate
                && arp.sender_hardware_addr() != local_mac;
            if conflict {
                klog_debug!(
                    "arp: {} claimed by {}",
                    candidate,
                    arp.sender_hardware_addr()
                );
            }
            conflict
        }
        None => false,
    }
}

// =============================================================================
// Construction
// =============================================================================

/// Turn the ARP request in `buf` into the reply, in place.
///
/// The request must already have passed [`is_request_for`].  Returns the
/// frame length (always [`ARP_FRAME_LEN`]).
pub fn build_reply(buf: &mut PacketBuffer, local_mac: MacAddr) -> NetResult<usize> {
    let storage = buf.storage_mut();
    let (requester_mac, requester_ip, local_ip) = {
        let arp = ArpPacket::new_checked(&storage[ETH_HEADER_LEN..ARP_FRAME_LEN])?;
        (
            arp.sender_hardware_addr(),
            arp.sender_protocol_addr(),
            arp.target_protocol_addr(),
        )
    };

    EthernetFrame::new_checked(&mut storage[..ARP_FRAME_LEN])?.make_reply(local_mac);

    let mut arp = ArpPacket::new_checked(&mut storage[ETH_HEADER_LEN..ARP_FRAME_LEN])?;
    arp.set_operation(ARP_OPER_REPLY);
    arp.set_sender(local_mac, local_ip);
    arp.set_target(requester_mac, requester_ip);

    buf.set_len(ARP_FRAME_LEN)?;
    Ok(ARP_FRAME_LEN)
}

/// Build a broadcast "who-has `target_ip`" request from scratch.
pub fn build_request(
    buf: &mut PacketBuffer,
    local_mac: MacAddr,
    local_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> NetResult<usize> {
    let storage = buf.storage_mut();
    ethernet::write_header(storage, MacAddr::BROADCAST, local_mac, ETHERTYPE_ARP)?;

    let mut arp = ArpPacket::new_checked(&mut storage[ETH_HEADER_LEN..ARP_FRAME_LEN])?;
    arp.set_ethernet_ipv4();
    arp.set_operation(ARP_OPER_REQUEST);
    arp.set_sender(local_mac, local_ip);
    arp.set_target(MacAddr::ZERO, target_ip);

    buf.set_len(ARP_FRAME_LEN)?;
    Ok(ARP_FRAME_LEN)
}

/// Gratuitous ARP: a request for our own address, announcing `ip` as ours.
pub fn build_gratuitous(buf: &mut PacketBuffer, local_mac: MacAddr, ip: Ipv4Addr) -> NetResult<usize> {
    build_request(buf, local_mac, ip, ip)
}
