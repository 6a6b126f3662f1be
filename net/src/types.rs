//! Type-safe network primitives shared by every protocol layer.
//!
//! Addresses are kept in **network byte order** exactly as they appear on the
//! wire, so header accessors can copy them in and out without conversion.

use core::fmt;
use core::str::FromStr;

// =============================================================================
// Addresses
// =============================================================================

/// IPv4 address stored in network byte order (`[u8; 4]`).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// `0.0.0.0`, used as the source of DHCP broadcasts and after a lease ends.
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);
    /// `255.255.255.255`, the limited broadcast address.
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);

    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    /// Construct from a `u32` whose most significant byte is the first octet.
    #[inline]
    pub const fn from_u32_be(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    /// Inverse of [`from_u32_be`](Self::from_u32_be).  This is also the
    /// persistent-storage encoding.
    #[inline]
    pub const fn to_u32_be(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.to_u32_be() == u32::MAX
    }

    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32_be() == 0
    }

    /// Read an address from the first four bytes of `bytes`.
    ///
    /// Callers pass slices whose length has already been checked.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Parses strict dotted-quad notation (`a.b.c.d`, each octet `0..=255`).
impl FromStr for Ipv4Addr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(NetError::InvalidArgument)?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NetError::InvalidArgument);
            }
            *octet = part.parse::<u8>().map_err(|_| NetError::InvalidArgument)?;
        }
        if parts.next().is_some() {
            return Err(NetError::InvalidArgument);
        }
        Ok(Self(octets))
    }
}

/// Ethernet hardware address.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);
    pub const ZERO: Self = Self([0; 6]);

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Read an address from the first six bytes of `bytes`.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[..6]);
        Self(mac)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

// =============================================================================
// NetError
// =============================================================================

/// Error type for frame construction and transmission.
///
/// Classification never produces an error: malformed input is simply "not a
/// match" and is dropped by the poll loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Buffer shorter than the header or length field it must hold.
    Truncated,
    /// A length or version field is inconsistent with the frame.
    Malformed,
    /// Checksum did not validate.
    BadChecksum,
    /// Not enough room left in the packet buffer or option area.
    NoBufferSpace,
    /// The bus driver reported a failed or aborted transmission.
    TransmitFailed,
    /// The PHY reports no link.
    LinkDown,
    /// A caller-supplied value is out of range or unparsable.
    InvalidArgument,
}

impl NetError {
    pub const fn as_str(self) -> &'static str {
        match self {
            NetError::Truncated => "frame truncated",
            NetError::Malformed => "malformed header",
            NetError::BadChecksum => "bad checksum",
            NetError::NoBufferSpace => "no buffer space",
            NetError::TransmitFailed => "transmit failed",
            NetError::LinkDown => "link down",
            NetError::InvalidArgument => "invalid argument",
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type NetResult<T = ()> = Result<T, NetError>;
