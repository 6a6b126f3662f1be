//! Internet one's-complement checksum (RFC 1071).
//!
//! A [`Checksum`] is a scratch accumulator: create it fresh for every
//! computation, feed it byte ranges with [`Checksum::add_bytes`], then call
//! [`Checksum::fold`].  When validating a received header the checksum field is
//! included in the sum and a valid frame folds to `0`.  When building a frame
//! the checksum field is zeroed first and the folded value is written back.

use crate::types::Ipv4Addr;

#[derive(Clone, Copy, Debug, Default)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    #[inline]
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    /// Accumulate big-endian 16-bit words.  An odd trailing byte is the high
    /// byte of a word whose low byte is zero.
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        let mut chunks = data.chunks_exact(2);
        for word in &mut chunks {
            self.add_u16(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = chunks.remainder() {
            self.add_u16(u16::from_be_bytes([*last, 0]));
        }
        self
    }

    #[inline]
    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        // Fold eagerly so the 32-bit accumulator never wraps on long frames.
        self.sum += word as u32;
        if self.sum > 0xffff {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        self
    }

    /// Add the IPv4 pseudo-header used by UDP and TCP: source, destination,
    /// zero, protocol, and the transport length.
    pub fn add_pseudo_header(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        length: u16,
    ) -> &mut Self {
        self.add_bytes(src.as_bytes());
        self.add_bytes(dst.as_bytes());
        self.add_u16(protocol as u16);
        self.add_u16(length);
        self
    }

    /// Wrap carries into the low 16 bits and return the one's complement.
    pub fn fold(&self) -> u16 {
        let mut sum = self.sum;
        while (sum >> 16) != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// Checksum of a contiguous byte range.
pub fn checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).fold()
}

/// Checksum of a UDP or TCP segment including the pseudo-header.
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    Checksum::new()
        .add_pseudo_header(src, dst, protocol, segment.len() as u16)
        .add_bytes(segment)
        .fold()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // Sample words from RFC 1071 section 3: sum 0xddf2, checksum 0x220d.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn test_odd_trailing_byte_is_high_order() {
        assert_eq!(checksum(&[0x12]), !0x1200);
        assert_eq!(checksum(&[0x00, 0x01, 0x12]), !(0x0001u16 + 0x1200));
    }

    #[test]
    fn test_embedded_checksum_validates_to_zero() {
        let mut header = [
            0x45, 0x00, 0x00, 0x54, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x01, 0x00, 0x00, 0xc0, 0xa8,
            0x01, 0x02, 0xc0, 0xa8, 0x01, 0x01,
        ];
        let csum = checksum(&header);
        header[10..12].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(checksum(&header), 0);
    }

    #[test]
    fn test_pseudo_header_round_trip() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut segment = [0x04, 0x00, 0x04, 0x01, 0x00, 0x0b, 0x00, 0x00, b'a', b'b', b'c'];
        let csum = transport_checksum(src, dst, 17, &segment);
        segment[6..8].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(transport_checksum(src, dst, 17, &segment), 0);
        // A different destination must not validate.
        assert_ne!(transport_checksum(src, Ipv4Addr::new(10, 0, 0, 3), 17, &segment), 0);
    }

    #[test]
    fn test_long_input_carries() {
        let data = [0xffu8; 1500];
        let mut framed = [0u8; 1502];
        framed[..1500].copy_from_slice(&data);
        let csum = checksum(&data);
        framed[1500..].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(checksum(&framed), 0);
    }
}
