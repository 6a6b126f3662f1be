//! Ethernet II header view.

use crate::types::{MacAddr, NetError, NetResult};
use crate::{ETH_ADDR_LEN, ETH_HEADER_LEN};

mod field {
    use core::ops::{Range, RangeFrom};

    pub const DESTINATION: Range<usize> = 0..6;
    pub const SOURCE: Range<usize> = 6..12;
    pub const ETHERTYPE: Range<usize> = 12..14;
    pub const PAYLOAD: RangeFrom<usize> = 14..;
}

/// Typed view over an Ethernet II frame.
///
/// [`EthernetFrame::new_checked`] guarantees the 14-byte header is present, so
/// the accessors below index without further checks.
#[derive(Debug)]
pub struct EthernetFrame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> EthernetFrame<T> {
    pub fn new_checked(buffer: T) -> NetResult<Self> {
        if buffer.as_ref().len() < ETH_HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    #[inline]
    pub fn dst_addr(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::DESTINATION])
    }

    #[inline]
    pub fn src_addr(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer.as_ref()[field::SOURCE])
    }

    #[inline]
    pub fn ethertype(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::ETHERTYPE];
        u16::from_be_bytes([b[0], b[1]])
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EthernetFrame<T> {
    #[inline]
    pub fn set_dst_addr(&mut self, addr: MacAddr) {
        self.buffer.as_mut()[field::DESTINATION].copy_from_slice(addr.as_bytes());
    }

    #[inline]
    pub fn set_src_addr(&mut self, addr: MacAddr) {
        self.buffer.as_mut()[field::SOURCE].copy_from_slice(addr.as_bytes());
    }

    #[inline]
    pub fn set_ethertype(&mut self, ethertype: u16) {
        self.buffer.as_mut()[field::ETHERTYPE].copy_from_slice(&ethertype.to_be_bytes());
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::PAYLOAD]
    }

    /// Address the frame back to its sender, from `local`.
    pub fn make_reply(&mut self, local: MacAddr) {
        let mut peer = [0u8; ETH_ADDR_LEN];
        peer.copy_from_slice(&self.buffer.as_ref()[field::SOURCE]);
        self.set_dst_addr(MacAddr(peer));
        self.set_src_addr(local);
    }
}

/// Write a fresh Ethernet header at the start of `out`.
pub fn write_header(out: &mut [u8], dst: MacAddr, src: MacAddr, ethertype: u16) -> NetResult<usize> {
    let mut frame = EthernetFrame::new_checked(out)?;
    frame.set_dst_addr(dst);
    frame.set_src_addr(src);
    frame.set_ethertype(ethertype);
    Ok(ETH_HEADER_LEN)
}
