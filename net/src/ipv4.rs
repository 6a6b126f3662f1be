//! IPv4 header view, validation and reply addressing.
//!
//! Received headers may carry options (IHL > 5); every offset into the
//! transport header is therefore derived from [`Ipv4Packet::header_len`].
//! Headers built from scratch are always the fixed 20 bytes.

use picoeth_lib::klog_trace;

use crate::checksum::checksum;
use crate::ethernet::EthernetFrame;
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{DEFAULT_TTL, ETH_HEADER_LEN, ETHERTYPE_IPV4, IPV4_HEADER_LEN};

mod field {
    use core::ops::Range;

    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const TOTAL_LEN: Range<usize> = 2..4;
    pub const IDENT: Range<usize> = 4..6;
    pub const FLAGS_FRAG: Range<usize> = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Range<usize> = 10..12;
    pub const SRC: Range<usize> = 12..16;
    pub const DST: Range<usize> = 16..20;
}

/// Typed view over an IPv4 datagram.
///
/// `new_checked` validates version, header length and total length against
/// the buffer; it does **not** validate the checksum (see
/// [`Ipv4Packet::verify_checksum`]).
#[derive(Debug)]
pub struct Ipv4Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Packet<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        let b = buffer.as_ref();
        if b.len() < IPV4_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let packet = Self { buffer };
        if packet.version() != 4 || packet.header_len() < IPV4_HEADER_LEN {
            return Err(NetError::Malformed);
        }
        let len = packet.buffer.as_ref().len();
        if packet.header_len() > len || packet.total_len() > len {
            return Err(NetError::Truncated);
        }
        if packet.total_len() < packet.header_len() {
            return Err(NetError::Malformed);
        }
        Ok(packet)
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    /// Header length in bytes: low nibble of the first byte × 4.
    #[inline]
    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0f) as usize) * 4
    }

    #[inline]
    pub fn total_len(&self) -> usize {
        let b = &self.buffer.as_ref()[field::TOTAL_LEN];
        u16::from_be_bytes([b[0], b[1]]) as usize
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    #[inline]
    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[field::PROTOCOL]
    }

    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::SRC])
    }

    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from_slice(&self.buffer.as_ref()[field::DST])
    }

    /// `true` if the header (including options) sums to zero.
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.buffer.as_ref()[..self.header_len()]) == 0
    }

    /// The transport segment: from the end of the header to `total_len`.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..self.total_len()]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Packet<T> {
    #[inline]
    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(addr.as_bytes());
    }

    #[inline]
    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::DST].copy_from_slice(addr.as_bytes());
    }

    /// Exchange source and destination addresses.
    pub fn swap_addrs(&mut self) {
        let src = self.src_addr();
        let dst = self.dst_addr();
        self.set_src_addr(dst);
        self.set_dst_addr(src);
    }

    /// Recompute the header checksum over the full header length.
    pub fn fill_checksum(&mut self) {
        let hlen = self.header_len();
        let b = self.buffer.as_mut();
        b[field::CHECKSUM].copy_from_slice(&[0, 0]);
        let csum = checksum(&b[..hlen]);
        b[field::CHECKSUM].copy_from_slice(&csum.to_be_bytes());
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.header_len(), self.total_len());
        &mut self.buffer.as_mut()[start..end]
    }
}

// =============================================================================
// Classification
// =============================================================================

/// `true` if `frame` carries an IPv4 datagram with a valid header checksum.
pub fn is_valid(frame: &[u8]) -> bool {
    let Ok(eth) = EthernetFrame::new_checked(frame) else {
        return false;
    };
    if eth.ethertype() != ETHERTYPE_IPV4 {
        return false;
    }
    match Ipv4Packet::new_checked(&frame[ETH_HEADER_LEN..]) {
        Ok(ip) => {
            let ok = ip.verify_checksum();
            if !ok {
                klog_trace!("ipv4: header checksum mismatch from {}", ip.src_addr());
            }
            ok
        }
        Err(_) => false,
    }
}

/// View the IP datagram of an already-validated frame.
pub fn packet(frame: &[u8]) -> Option<Ipv4Packet<&[u8]>> {
    Ipv4Packet::new_checked(frame.get(ETH_HEADER_LEN..)?).ok()
}

/// `true` if the datagram is addressed to `local_ip`.
pub fn is_unicast_to(frame: &[u8], local_ip: Ipv4Addr) -> bool {
    packet(frame).is_some_and(|ip| ip.dst_addr() == local_ip)
}

/// `true` if the datagram is addressed to `255.255.255.255`.
pub fn is_broadcast(frame: &[u8]) -> bool {
    packet(frame).is_some_and(|ip| ip.dst_addr().is_broadcast())
}

// =============================================================================
// Construction
// =============================================================================

/// Readdress a received frame back to its sender, in place.
///
/// Swaps the Ethernet and IP endpoints and sets the Ethernet source to
/// `local_mac`.  Returns the IP header length so the caller can locate the
/// transport header.  Lengths and checksums are left to the caller.
pub fn make_reply(storage: &mut [u8], local_mac: MacAddr) -> NetResult<usize> {
    EthernetFrame::new_checked(&mut *storage)?.make_reply(local_mac);
    let mut ip = Ipv4Packet::new_checked(&mut storage[ETH_HEADER_LEN..])?;
    ip.swap_addrs();
    Ok(ip.header_len())
}

/// Set the total length of the datagram starting at `ip_area` and refresh
/// its header checksum.
pub fn finish_header(ip_area: &mut [u8], total_len: usize) -> NetResult {
    if total_len > ip_area.len() || total_len > u16::MAX as usize {
        return Err(NetError::NoBufferSpace);
    }
    ip_area[field::TOTAL_LEN].copy_from_slice(&(total_len as u16).to_be_bytes());
    let mut ip = Ipv4Packet::new_checked(&mut ip_area[..total_len])?;
    ip.fill_checksum();
    Ok(())
}

/// Write a fixed 20-byte header for a fresh datagram carrying `payload_len`
/// bytes of `protocol`, checksum included.
pub fn write_header(
    ip_area: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    payload_len: usize,
) -> NetResult<usize> {
    let total = IPV4_HEADER_LEN + payload_len;
    if ip_area.len() < total || total > u16::MAX as usize {
        return Err(NetError::NoBufferSpace);
    }
    let h = &mut ip_area[..IPV4_HEADER_LEN];
    h[field::VER_IHL] = 0x45;
    h[field::TOS] = 0;
    h[field::TOTAL_LEN].copy_from_slice(&(total as u16).to_be_bytes());
    h[field::IDENT].copy_from_slice(&[0, 0]);
    h[field::FLAGS_FRAG].copy_from_slice(&[0, 0]);
    h[field::TTL] = DEFAULT_TTL;
    h[field::PROTOCOL] = protocol;
    h[field::SRC].copy_from_slice(src.as_bytes());
    h[field::DST].copy_from_slice(dst.as_bytes());
    let mut ip = Ipv4Packet::new_checked(&mut ip_area[..total])?;
    ip.fill_checksum();
    Ok(IPV4_HEADER_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IPPROTO_UDP;
    use crate::ethernet;

    fn frame_with_header(src: Ipv4Addr, dst: Ipv4Addr) -> [u8; 42] {
        let mut raw = [0u8; 42];
        ethernet::write_header(&mut raw, MacAddr([1; 6]), MacAddr([2; 6]), ETHERTYPE_IPV4).unwrap();
        write_header(&mut raw[ETH_HEADER_LEN..], src, dst, IPPROTO_UDP, 8).unwrap();
        raw
    }

    #[test]
    fn test_fresh_header_validates() {
        let raw = frame_with_header(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert!(is_valid(&raw));
        let ip = packet(&raw).unwrap();
        assert_eq!(ip.total_len(), 28);
        assert_eq!(ip.ttl(), DEFAULT_TTL);
        assert_eq!(ip.payload().len(), 8);
        assert!(is_unicast_to(&raw, Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!is_broadcast(&raw));
    }

    #[test]
    fn test_corrupted_header_rejected() {
        let mut raw = frame_with_header(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::BROADCAST);
        assert!(is_broadcast(&raw));
        raw[ETH_HEADER_LEN + 8] ^= 0x01;
        assert!(!is_valid(&raw));
    }

    #[test]
    fn test_bad_lengths_rejected() {
        let mut raw = frame_with_header(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        // IHL of 4 words is below the minimum.
        raw[ETH_HEADER_LEN] = 0x44;
        assert_eq!(
            Ipv4Packet::new_checked(&raw[ETH_HEADER_LEN..]).err(),
            Some(NetError::Malformed)
        );
        // Total length beyond the buffer.
        raw[ETH_HEADER_LEN] = 0x45;
        raw[ETH_HEADER_LEN + 2..ETH_HEADER_LEN + 4].copy_from_slice(&100u16.to_be_bytes());
        assert_eq!(
            Ipv4Packet::new_checked(&raw[ETH_HEADER_LEN..]).err(),
            Some(NetError::Truncated)
        );
    }

    #[test]
    fn test_make_reply_swaps_and_refresh_validates() {
        let peer = Ipv4Addr::new(10, 0, 0, 1);
        let local = Ipv4Addr::new(10, 0, 0, 2);
        let mut raw = frame_with_header(peer, local);
        let local_mac = MacAddr([9; 6]);
        assert_eq!(make_reply(&mut raw, local_mac), Ok(IPV4_HEADER_LEN));
        finish_header(&mut raw[ETH_HEADER_LEN..], 28).unwrap();
        assert!(is_valid(&raw));
        let ip = packet(&raw).unwrap();
        assert_eq!(ip.src_addr(), local);
        assert_eq!(ip.dst_addr(), peer);
        let eth = EthernetFrame::new_checked(&raw[..]).unwrap();
        assert_eq!(eth.src_addr(), local_mac);
        assert_eq!(eth.dst_addr(), MacAddr([2; 6]));
    }
}
