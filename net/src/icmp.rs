//! ICMP echo (RFC 792).

use crate::checksum::checksum;
use crate::ipv4;
use crate::packetbuf::PacketBuffer;
use crate::types::{MacAddr, NetError, NetResult};
use crate::{ETH_HEADER_LEN, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, ICMP_HEADER_LEN, IPPROTO_ICMP};

mod field {
    use core::ops::Range;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: Range<usize> = 2..4;
    pub const IDENT: Range<usize> = 4..6;
    pub const SEQ: Range<usize> = 6..8;
}

/// Typed view over an ICMP echo request or reply.
#[derive(Debug)]
pub struct IcmpEcho<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpEcho<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        if buffer.as_ref().len() < ICMP_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    #[inline]
    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[field::TYPE]
    }

    #[inline]
    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    #[inline]
    pub fn ident(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::IDENT];
        u16::from_be_bytes([b[0], b[1]])
    }

    #[inline]
    pub fn seq_no(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::SEQ];
        u16::from_be_bytes([b[0], b[1]])
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_ref()[ICMP_HEADER_LEN..]
    }

    pub fn verify_checksum(&self) -> bool {
        checksum(self.buffer.as_ref()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpEcho<T> {
    #[inline]
    pub fn set_msg_type(&mut self, msg_type: u8) {
        self.buffer.as_mut()[field::TYPE] = msg_type;
    }

    /// Recompute the checksum over type, code, id, sequence and data.
    pub fn fill_checksum(&mut self) {
        let b = self.buffer.as_mut();
        b[field::CHECKSUM].copy_from_slice(&[0, 0]);
        let csum = checksum(b);
        b[field::CHECKSUM].copy_from_slice(&csum.to_be_bytes());
    }
}

/// `true` if `frame` is a valid ICMP echo request.  The IP header must
/// already have been validated.
pub fn is_echo_request(frame: &[u8]) -> bool {
    let Some(ip) = ipv4::packet(frame) else {
        return false;
    };
    if ip.protocol() != IPPROTO_ICMP {
        return false;
    }
    match IcmpEcho::new_checked(ip.payload()) {
        Ok(icmp) => icmp.msg_type() == ICMP_ECHO_REQUEST && icmp.verify_checksum(),
        Err(_) => false,
    }
}

/// Turn the echo request in `buf` into an echo reply, in place.
///
/// Identifier, sequence number and data are echoed unchanged; the frame
/// length follows the IP total length of the request.
pub fn build_echo_reply(buf: &mut PacketBuffer, local_mac: MacAddr) -> NetResult<usize> {
    let storage = buf.storage_mut();
    ipv4::make_reply(storage, local_mac)?;

    let mut ip = ipv4::Ipv4Packet::new_checked(&mut storage[ETH_HEADER_LEN..])?;
    let total = ip.total_len();
    let mut icmp = IcmpEcho::new_checked(ip.payload_mut())?;
    icmp.set_msg_type(ICMP_ECHO_REPLY);
    icmp.fill_checksum();
    ip.fill_checksum();

    let len = ETH_HEADER_LEN + total;
    buf.set_len(len)?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{LOCAL_IP, LOCAL_MAC, PEER_IP, echo_request};

    #[test]
    fn test_echo_request_classified() {
        let buf = echo_request(0x1234, 1, &[0xab; 32]);
        assert!(ipv4::is_valid(buf.frame()));
        assert!(is_echo_request(buf.frame()));
    }

    #[test]
    fn test_bad_icmp_checksum_rejected() {
        let mut buf = echo_request(0x1234, 1, &[0xab; 32]);
        let last = buf.len() - 1;
        buf.frame_mut()[last] ^= 0xff;
        assert!(!is_echo_request(buf.frame()));
    }

    #[test]
    fn test_echo_reply_mirrors_request() {
        let mut buf = echo_request(0x1234, 1, &[0x5a; 32]);
        let len = build_echo_reply(&mut buf, LOCAL_MAC).unwrap();
        assert_eq!(len, ETH_HEADER_LEN + 20 + 8 + 32);

        let frame = buf.frame();
        assert!(ipv4::is_valid(frame));
        let ip = ipv4::packet(frame).unwrap();
        assert_eq!(ip.src_addr(), LOCAL_IP);
        assert_eq!(ip.dst_addr(), PEER_IP);
        let icmp = IcmpEcho::new_checked(ip.payload()).unwrap();
        assert_eq!(icmp.msg_type(), ICMP_ECHO_REPLY);
        assert_eq!(icmp.code(), 0);
        assert_eq!(icmp.ident(), 0x1234);
        assert_eq!(icmp.seq_no(), 1);
        assert_eq!(icmp.data(), &[0x5a; 32][..]);
        assert!(icmp.verify_checksum());
        assert!(!is_echo_request(frame));
    }
}
