//! TCP (RFC 793 subset) segment view, validation and segment construction.
//!
//! Only the fixed 20-byte header is ever built: no options, no window
//! scaling.  Received segments may carry options; the payload offset always
//! follows the data-offset nibble.

use bitflags::bitflags;
use picoeth_lib::klog_trace;

use crate::checksum::Checksum;
use crate::ipv4;
use crate::packetbuf::PacketBuffer;
use crate::types::{Ipv4Addr, MacAddr, NetError, NetResult};
use crate::{ETH_HEADER_LEN, IPPROTO_TCP, TCP_HEADER_LEN};

/// Receive window advertised in every segment we send.
pub const DEFAULT_WINDOW_SIZE: u16 = 1024;

mod field {
    use core::ops::Range;

    pub const SRC_PORT: Range<usize> = 0..2;
    pub const DST_PORT: Range<usize> = 2..4;
    pub const SEQ: Range<usize> = 4..8;
    pub const ACK: Range<usize> = 8..12;
    pub const OFFSET_FLAGS: Range<usize> = 12..14;
    pub const WINDOW: Range<usize> = 14..16;
    pub const CHECKSUM: Range<usize> = 16..18;
    pub const URGENT: Range<usize> = 18..20;
}

bitflags! {
    /// Control bits, as they sit in the low bits of the data-offset/flags
    /// word.  The data offset occupies the top nibble of the same word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpControl: u16 {
        const FIN = 0x001;
        const SYN = 0x002;
        const RST = 0x004;
        const PSH = 0x008;
        const ACK = 0x010;
        const URG = 0x020;
    }
}

/// Typed view over a TCP segment.  The buffer spans exactly the segment
/// (IP total length minus IP header length).
#[derive(Debug)]
pub struct TcpSegment<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpSegment<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        let len = buffer.as_ref().len();
        if len < TCP_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let segment = Self { buffer };
        let hlen = segment.header_len();
        if hlen < TCP_HEADER_LEN {
            return Err(NetError::Malformed);
        }
        if hlen > len {
            return Err(NetError::Truncated);
        }
        Ok(segment)
    }

    fn read_u16(&self, range: core::ops::Range<usize>) -> u16 {
        let b = &self.buffer.as_ref()[range];
        u16::from_be_bytes([b[0], b[1]])
    }

    fn read_u32(&self, range: core::ops::Range<usize>) -> u32 {
        let b = &self.buffer.as_ref()[range];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        self.read_u16(field::SRC_PORT)
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        self.read_u16(field::DST_PORT)
    }

    #[inline]
    pub fn seq_number(&self) -> u32 {
        self.read_u32(field::SEQ)
    }

    #[inline]
    pub fn ack_number(&self) -> u32 {
        self.read_u32(field::ACK)
    }

    /// Header length in bytes: the top nibble of the offset/flags word × 4.
    #[inline]
    pub fn header_len(&self) -> usize {
        ((self.read_u16(field::OFFSET_FLAGS) >> 12) as usize) * 4
    }

    #[inline]
    pub fn control(&self) -> TcpControl {
        TcpControl::from_bits_truncate(self.read_u16(field::OFFSET_FLAGS))
    }

    #[inline]
    pub fn window(&self) -> u16 {
        self.read_u16(field::WINDOW)
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    /// The pseudo-header length is the whole segment, i.e. IP total length
    /// minus IP header length.
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        let b = self.buffer.as_ref();
        Checksum::new()
            .add_pseudo_header(src, dst, IPPROTO_TCP, b.len() as u16)
            .add_bytes(b)
            .fold()
            == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TcpSegment<T> {
    #[inline]
    pub fn set_src_port(&mut self, port: u16) {
        self.buffer.as_mut()[field::SRC_PORT].copy_from_slice(&port.to_be_bytes());
    }

    #[inline]
    pub fn set_dst_port(&mut self, port: u16) {
        self.buffer.as_mut()[field::DST_PORT].copy_from_slice(&port.to_be_bytes());
    }

    #[inline]
    pub fn set_seq_number(&mut self, seq: u32) {
        self.buffer.as_mut()[field::SEQ].copy_from_slice(&seq.to_be_bytes());
    }

    #[inline]
    pub fn set_ack_number(&mut self, ack: u32) {
        self.buffer.as_mut()[field::ACK].copy_from_slice(&ack.to_be_bytes());
    }

    /// Replace the control bits, keeping the data-offset nibble.
    pub fn set_control(&mut self, flags: TcpControl) {
        let word = (self.read_u16(field::OFFSET_FLAGS) & 0xf000) | flags.bits();
        self.buffer.as_mut()[field::OFFSET_FLAGS].copy_from_slice(&word.to_be_bytes());
    }

    /// Write data offset and control bits together.
    pub fn set_offset_and_control(&mut self, header_len: usize, flags: TcpControl) {
        let word = (((header_len / 4) as u16) << 12) | flags.bits();
        self.buffer.as_mut()[field::OFFSET_FLAGS].copy_from_slice(&word.to_be_bytes());
    }

    #[inline]
    pub fn set_window(&mut self, window: u16) {
        self.buffer.as_mut()[field::WINDOW].copy_from_slice(&window.to_be_bytes());
    }

    #[inline]
    pub fn clear_urgent(&mut self) {
        self.buffer.as_mut()[field::URGENT].copy_from_slice(&[0, 0]);
    }

    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        let b = self.buffer.as_mut();
        b[field::CHECKSUM].copy_from_slice(&[0, 0]);
        let csum = Checksum::new()
            .add_pseudo_header(src, dst, IPPROTO_TCP, b.len() as u16)
            .add_bytes(b)
            .fold();
        b[field::CHECKSUM].copy_from_slice(&csum.to_be_bytes());
    }
}

// =============================================================================
// TcpHeader
// =============================================================================

/// Fields of a validated inbound segment, copied out of the buffer so the
/// responder can decide without holding a borrow on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: TcpControl,
    pub payload_len: usize,
}

impl TcpHeader {
    #[inline]
    pub const fn is_syn(&self) -> bool {
        self.flags.contains(TcpControl::SYN)
    }

    #[inline]
    pub const fn is_ack(&self) -> bool {
        self.flags.contains(TcpControl::ACK)
    }

    #[inline]
    pub const fn is_fin(&self) -> bool {
        self.flags.contains(TcpControl::FIN)
    }

    #[inline]
    pub const fn is_rst(&self) -> bool {
        self.flags.contains(TcpControl::RST)
    }

    #[inline]
    pub const fn is_fin_ack(&self) -> bool {
        self.is_fin() && self.is_ack()
    }
}

// =============================================================================
// Classification
// =============================================================================

fn segment(frame: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, TcpSegment<&[u8]>)> {
    let ip = ipv4::packet(frame)?;
    if ip.protocol() != IPPROTO_TCP {
        return None;
    }
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let start = ETH_HEADER_LEN + ip.header_len();
    let end = ETH_HEADER_LEN + ip.total_len();
    let tcp = TcpSegment::new_checked(&frame[start..end]).ok()?;
    if !tcp.verify_checksum(src, dst) {
        klog_trace!("tcp: checksum mismatch from {}:{}", src, tcp.src_port());
        return None;
    }
    Some((src, dst, tcp))
}

/// `true` if the (IP-validated) frame carries a TCP segment with a valid
/// checksum.
pub fn is_tcp(frame: &[u8]) -> bool {
    segment(frame).is_some()
}

/// Copy the header fields of a valid segment.
pub fn parse(frame: &[u8]) -> Option<TcpHeader> {
    let (_, _, tcp) = segment(frame)?;
    Some(TcpHeader {
        src_port: tcp.src_port(),
        dst_port: tcp.dst_port(),
        seq_num: tcp.seq_number(),
        ack_num: tcp.ack_number(),
        flags: tcp.control(),
        payload_len: tcp.payload().len(),
    })
}

// =============================================================================
// Construction
// =============================================================================

/// Turn the segment in `buf` into a reply, in place.
///
/// Endpoints are swapped, the header is rewritten as a plain 20-byte header
/// carrying `seq`, `ack` and `flags`, and `payload` follows it.  IP length,
/// IP checksum and TCP checksum are recomputed.
pub fn build_reply(
    buf: &mut PacketBuffer,
    local_mac: MacAddr,
    seq: u32,
    ack: u32,
    flags: TcpControl,
    payload: &[u8],
) -> NetResult<usize> {
    let storage = buf.storage_mut();
    let hlen = ipv4::make_reply(storage, local_mac)?;

    let ip_start = ETH_HEADER_LEN;
    let tcp_start = ip_start + hlen;
    let seg_len = TCP_HEADER_LEN + payload.len();
    let total = hlen + seg_len;
    if ip_start + total > storage.len() {
        return Err(NetError::NoBufferSpace);
    }

    let (src, dst) = {
        let ip = &storage[ip_start..];
        (Ipv4Addr::from_slice(&ip[12..16]), Ipv4Addr::from_slice(&ip[16..20]))
    };
    let (req_src_port, req_dst_port) = {
        let b = &storage[tcp_start..tcp_start + 4];
        (u16::from_be_bytes([b[0], b[1]]), u16::from_be_bytes([b[2], b[3]]))
    };

    storage[tcp_start + TCP_HEADER_LEN..tcp_start + seg_len].copy_from_slice(payload);
    {
        let area = &mut storage[tcp_start..tcp_start + seg_len];
        // Offset nibble must be valid before the checked view is built.
        area[12..14].copy_from_slice(&(((TCP_HEADER_LEN / 4) as u16) << 12).to_be_bytes());
        let mut tcp = TcpSegment::new_checked(area)?;
        tcp.set_src_port(req_dst_port);
        tcp.set_dst_port(req_src_port);
        tcp.set_seq_number(seq);
        tcp.set_ack_number(ack);
        tcp.set_offset_and_control(TCP_HEADER_LEN, flags);
        tcp.set_window(DEFAULT_WINDOW_SIZE);
        tcp.clear_urgent();
        tcp.fill_checksum(src, dst);
    }
    ipv4::finish_header(&mut storage[ip_start..], total)?;

    let len = ETH_HEADER_LEN + total;
    buf.set_len(len)?;
    Ok(len)
}

/// Replace the control bits of the segment already built in `buf` and
/// recompute its checksum.  Used to send a FIN+ACK right after the ACK of
/// the same exchange.
pub fn rewrite_flags(buf: &mut PacketBuffer, flags: TcpControl) -> NetResult {
    let frame = buf.frame_mut();
    let (src, dst, start, end) = {
        let ip = ipv4::Ipv4Packet::new_checked(&frame[ETH_HEADER_LEN..])?;
        (
            ip.src_addr(),
            ip.dst_addr(),
            ETH_HEADER_LEN + ip.header_len(),
            ETH_HEADER_LEN + ip.total_len(),
        )
    };
    let mut tcp = TcpSegment::new_checked(&mut frame[start..end])?;
    tcp.set_control(flags);
    tcp.fill_checksum(src, dst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{LOCAL_IP, LOCAL_MAC, PEER_IP, tcp_segment};

    #[test]
    fn test_flags_share_word_with_offset() {
        let buf = tcp_segment(40000, 23, 100, 0, TcpControl::SYN, b"");
        let hdr = parse(buf.frame()).unwrap();
        assert!(hdr.is_syn());
        assert!(!hdr.is_ack());
        let raw = &buf.frame()[ETH_HEADER_LEN + 20 + 12..ETH_HEADER_LEN + 20 + 14];
        assert_eq!(u16::from_be_bytes([raw[0], raw[1]]), 0x5002);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut buf = tcp_segment(40000, 23, 100, 0, TcpControl::SYN, b"");
        let seq_at = ETH_HEADER_LEN + 20 + 4;
        buf.frame_mut()[seq_at] ^= 0x01;
        assert!(ipv4::is_valid(buf.frame()));
        assert!(!is_tcp(buf.frame()));
    }

    #[test]
    fn test_payload_length_from_ip_total() {
        let buf = tcp_segment(40000, 23, 7, 1, TcpControl::PSH | TcpControl::ACK, b"ls\r\n");
        let hdr = parse(buf.frame()).unwrap();
        assert_eq!(hdr.payload_len, 4);
        assert_eq!(hdr.seq_num, 7);
        assert_eq!(hdr.ack_num, 1);
    }

    #[test]
    fn test_reply_swaps_ports_and_validates() {
        let mut buf = tcp_segment(40000, 23, 100, 0, TcpControl::SYN, b"");
        build_reply(&mut buf, LOCAL_MAC, 5000, 101, TcpControl::SYN | TcpControl::ACK, b"").unwrap();

        let (src, dst, tcp) = segment(buf.frame()).unwrap();
        assert_eq!((src, dst), (LOCAL_IP, PEER_IP));
        assert_eq!(tcp.src_port(), 23);
        assert_eq!(tcp.dst_port(), 40000);
        assert_eq!(tcp.seq_number(), 5000);
        assert_eq!(tcp.ack_number(), 101);
        assert_eq!(tcp.control(), TcpControl::SYN | TcpControl::ACK);
        assert_eq!(tcp.header_len(), TCP_HEADER_LEN);
        assert_eq!(tcp.window(), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_rewrite_flags_recomputes_checksum() {
        let mut buf = tcp_segment(40000, 23, 100, 1, TcpControl::FIN | TcpControl::ACK, b"");
        build_reply(&mut buf, LOCAL_MAC, 1, 101, TcpControl::ACK, b"").unwrap();
        assert!(is_tcp(buf.frame()));
        rewrite_flags(&mut buf, TcpControl::FIN | TcpControl::ACK).unwrap();
        let hdr = parse(buf.frame()).unwrap();
        assert!(hdr.is_fin_ack());
        assert_eq!(hdr.seq_num, 1);
    }

    #[test]
    fn test_reply_carries_payload() {
        let mut buf = tcp_segment(40000, 23, 7, 1, TcpControl::PSH | TcpControl::ACK, b"hi");
        build_reply(&mut buf, LOCAL_MAC, 1, 9, TcpControl::PSH | TcpControl::ACK, b"Hello").unwrap();
        let (_, _, tcp) = segment(buf.frame()).unwrap();
        assert_eq!(tcp.payload(), b"Hello");
    }
}
