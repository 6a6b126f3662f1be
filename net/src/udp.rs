//! UDP (RFC 768) datagram view, validation and response construction.

use picoeth_lib::klog_trace;

use crate::checksum::Checksum;
use crate::ipv4;
use crate::packetbuf::PacketBuffer;
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{ETH_HEADER_LEN, IPPROTO_UDP, UDP_HEADER_LEN};

mod field {
    use core::ops::Range;

    pub const SRC_PORT: Range<usize> = 0..2;
    pub const DST_PORT: Range<usize> = 2..4;
    pub const LENGTH: Range<usize> = 4..6;
    pub const CHECKSUM: Range<usize> = 6..8;
}

/// Typed view over a UDP datagram.
///
/// `new_checked` ensures the length field fits inside the buffer, so
/// [`UdpPacket::payload`] is always in bounds.
#[derive(Debug)]
pub struct UdpPacket<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpPacket<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        let len = buffer.as_ref().len();
        if len < UDP_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let packet = Self { buffer };
        let udp_len = packet.len();
        if udp_len < UDP_HEADER_LEN {
            return Err(NetError::Malformed);
        }
        if udp_len > len {
            return Err(NetError::Truncated);
        }
        Ok(packet)
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::SRC_PORT];
        u16::from_be_bytes([b[0], b[1]])
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::DST_PORT];
        u16::from_be_bytes([b[0], b[1]])
    }

    /// Value of the length field (header + payload).
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        let b = &self.buffer.as_ref()[field::LENGTH];
        u16::from_be_bytes([b[0], b[1]]) as usize
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[UDP_HEADER_LEN..self.len()]
    }

    /// Validate against the pseudo-header.  The sum runs over the length
    /// carried in the UDP header, not the IP header.
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        let len = self.len();
        Checksum::new()
            .add_pseudo_header(src, dst, IPPROTO_UDP, len as u16)
            .add_bytes(&self.buffer.as_ref()[..len])
            .fold()
            == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpPacket<T> {
    #[inline]
    pub fn set_src_port(&mut self, port: u16) {
        self.buffer.as_mut()[field::SRC_PORT].copy_from_slice(&port.to_be_bytes());
    }

    #[inline]
    pub fn set_dst_port(&mut self, port: u16) {
        self.buffer.as_mut()[field::DST_PORT].copy_from_slice(&port.to_be_bytes());
    }

    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        let len = self.len();
        let b = self.buffer.as_mut();
        b[field::CHECKSUM].copy_from_slice(&[0, 0]);
        let csum = Checksum::new()
            .add_pseudo_header(src, dst, IPPROTO_UDP, len as u16)
            .add_bytes(&b[..len])
            .fold();
        // A computed zero is sent as all ones; zero means "no checksum".
        let csum = if csum == 0 { 0xffff } else { csum };
        b[field::CHECKSUM].copy_from_slice(&csum.to_be_bytes());
    }
}

/// Write a UDP header in front of the `payload_len` bytes already present at
/// `segment[8..]` and fill its checksum.  Returns the datagram length.
pub fn write_header(
    segment: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload_len: usize,
) -> NetResult<usize> {
    let len = UDP_HEADER_LEN + payload_len;
    if segment.len() < len || len > u16::MAX as usize {
        return Err(NetError::NoBufferSpace);
    }
    segment[field::LENGTH].copy_from_slice(&(len as u16).to_be_bytes());
    let mut udp = UdpPacket::new_checked(&mut segment[..len])?;
    udp.set_src_port(src_port);
    udp.set_dst_port(dst_port);
    udp.fill_checksum(src, dst);
    Ok(len)
}

// =============================================================================
// Classification
// =============================================================================

/// `true` if the (IP-validated) frame carries a UDP datagram with a valid
/// checksum.
pub fn is_udp(frame: &[u8]) -> bool {
    datagram(frame).is_some()
}

/// The validated datagram of `frame` together with its IP endpoints.
pub fn datagram(frame: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, UdpPacket<&[u8]>)> {
    let ip = ipv4::packet(frame)?;
    if ip.protocol() != IPPROTO_UDP {
        return None;
    }
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let start = ETH_HEADER_LEN + ip.header_len();
    let end = ETH_HEADER_LEN + ip.total_len();
    let udp = UdpPacket::new_checked(&frame[start..end]).ok()?;
    if !udp.verify_checksum(src, dst) {
        klog_trace!("udp: checksum mismatch from {}:{}", src, udp.src_port());
        return None;
    }
    Some((src, dst, udp))
}

// =============================================================================
// Construction
// =============================================================================

/// Turn the datagram in `buf` into a response carrying `data`, in place.
///
/// The response's source port is the request's destination port and its
/// destination port is the request's source port.
pub fn build_response(buf: &mut PacketBuffer, local_mac: MacAddr, data: &[u8]) -> NetResult<usize> {
    let storage = buf.storage_mut();
    let hlen = ipv4::make_reply(storage, local_mac)?;

    let ip_start = ETH_HEADER_LEN;
    let udp_start = ip_start + hlen;
    let udp_len = UDP_HEADER_LEN + data.len();
    let total = hlen + udp_len;
    if ip_start + total > storage.len() {
        return Err(NetError::NoBufferSpace);
    }

    let (src, dst) = {
        let ip = &storage[ip_start..];
        (Ipv4Addr::from_slice(&ip[12..16]), Ipv4Addr::from_slice(&ip[16..20]))
    };
    let (req_src_port, req_dst_port) = {
        let b = &storage[udp_start..udp_start + UDP_HEADER_LEN];
        (u16::from_be_bytes([b[0], b[1]]), u16::from_be_bytes([b[2], b[3]]))
    };

    storage[udp_start + UDP_HEADER_LEN..udp_start + udp_len].copy_from_slice(data);
    write_header(
        &mut storage[udp_start..],
        src,
        dst,
        req_dst_port,
        req_src_port,
        data.len(),
    )?;
    ipv4::finish_header(&mut storage[ip_start..], total)?;

    let len = ETH_HEADER_LEN + total;
    buf.set_len(len)?;
    Ok(len)
}
