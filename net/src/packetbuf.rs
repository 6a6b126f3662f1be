//! The single packet buffer owned by the poll loop.
//!
//! One `PacketBuffer` carries a frame through a whole receive/transmit cycle:
//! the bus driver fills it, the classifiers read it through typed views, and
//! the reply builders rewrite it in place before it goes back to the driver.
//!
//! # Layout
//!
//! ```text
//! |<------------- len ------------->|<------- spare capacity ------->|
//! 0                                len                    MAX_PACKET_SIZE
//! ```
//!
//! Builders may write past `len` into the spare capacity (a reply can be longer
//! than the request) and then call [`PacketBuffer::set_len`].

use core::fmt;

use crate::types::{NetError, NetResult};

/// Ethernet header with VLAN tag (18) + maximum MTU (1500) + CRC (4).
pub const MAX_PACKET_SIZE: usize = 1522;

pub struct PacketBuffer {
    data: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl PacketBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; MAX_PACKET_SIZE],
            len: 0,
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        MAX_PACKET_SIZE
    }

    /// Declare how many bytes of the storage hold the current frame.
    pub fn set_len(&mut self, len: usize) -> NetResult {
        if len > MAX_PACKET_SIZE {
            return Err(NetError::NoBufferSpace);
        }
        self.len = len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The current frame, `data[..len]`.
    #[inline]
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// The whole backing storage, used by the driver on receive and by
    /// builders that grow the frame.
    #[inline]
    pub fn storage(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the frame with a copy of `bytes`.
    pub fn load(&mut self, bytes: &[u8]) -> NetResult {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(NetError::NoBufferSpace);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_len_bounds() {
        let mut buf = PacketBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.set_len(MAX_PACKET_SIZE), Ok(()));
        assert_eq!(buf.frame().len(), MAX_PACKET_SIZE);
        assert_eq!(buf.set_len(MAX_PACKET_SIZE + 1), Err(NetError::NoBufferSpace));
        assert_eq!(buf.len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn test_load_copies_frame() {
        let mut buf = PacketBuffer::new();
        buf.load(&[1, 2, 3]).unwrap();
        assert_eq!(buf.frame(), &[1, 2, 3]);
        buf.clear();
        assert!(buf.frame().is_empty());
    }
}
