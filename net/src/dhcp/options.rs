//! DHCP option area (RFC 2132): type-length-value lookup and construction.

use heapless::Vec;

use crate::types::{Ipv4Addr, NetError, NetResult};

use super::{OPTION_END, OPTION_PAD};

/// Longest value any option built by this client carries (client id is 7).
pub const MAX_OPTION_VALUE: usize = 16;

/// Scan `options` for `code` and return its value bytes.
///
/// Pad bytes are skipped, the end marker stops the scan, and an option whose
/// length runs past the area is treated as the end of the list.
pub fn find_option(options: &[u8], code: u8) -> Option<&[u8]> {
    let mut i = 0usize;
    while i < options.len() {
        let cur = options[i];
        if cur == OPTION_END {
            return None;
        }
        if cur == OPTION_PAD {
            i += 1;
            continue;
        }
        let len = *options.get(i + 1)? as usize;
        let value = options.get(i + 2..i + 2 + len)?;
        if cur == code {
            return Some(value);
        }
        i += 2 + len;
    }
    None
}

pub fn option_u8(options: &[u8], code: u8) -> Option<u8> {
    find_option(options, code)?.first().copied()
}

pub fn option_u32(options: &[u8], code: u8) -> Option<u32> {
    match find_option(options, code)? {
        [a, b, c, d, ..] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

pub fn option_addr(options: &[u8], code: u8) -> Option<Ipv4Addr> {
    option_u32(options, code).map(Ipv4Addr::from_u32_be)
}

/// Value of one option: a short byte string with an explicit length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionValue(Vec<u8, MAX_OPTION_VALUE>);

impl OptionValue {
    pub fn from_u8(value: u8) -> NetResult<Self> {
        Self::from_slice(&[value])
    }

    pub fn from_u32(value: u32) -> NetResult<Self> {
        Self::from_slice(&value.to_be_bytes())
    }

    pub fn from_addr(addr: Ipv4Addr) -> NetResult<Self> {
        Self::from_slice(addr.as_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> NetResult<Self> {
        Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| NetError::InvalidArgument)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Appends TLV options to an option area, tracking the running length.
pub struct OptionWriter<'a> {
    area: &'a mut [u8],
    len: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(area: &'a mut [u8]) -> Self {
        Self { area, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one option.  Returns the new area length.
    pub fn put(&mut self, code: u8, value: &OptionValue) -> NetResult<usize> {
        let bytes = value.as_slice();
        let end = self.len + 2 + bytes.len();
        // Keep room for the end marker.
        if end + 1 > self.area.len() {
            return Err(NetError::NoBufferSpace);
        }
        self.area[self.len] = code;
        self.area[self.len + 1] = bytes.len() as u8;
        self.area[self.len + 2..end].copy_from_slice(bytes);
        self.len = end;
        Ok(self.len)
    }

    /// Terminate the list.  Returns the final area length.
    pub fn finish(self) -> NetResult<usize> {
        if self.len >= self.area.len() {
            return Err(NetError::NoBufferSpace);
        }
        self.area[self.len] = OPTION_END;
        Ok(self.len + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::{OPTION_LEASE_TIME, OPTION_MSG_TYPE, OPTION_ROUTER, OPTION_SERVER_ID};

    #[test]
    fn test_lookup_skips_pad_and_stops_at_end() {
        let area = [
            0, 0, OPTION_MSG_TYPE, 1, 2, OPTION_SERVER_ID, 4, 10, 0, 0, 1, 255, OPTION_ROUTER, 4,
            1, 2, 3, 4,
        ];
        assert_eq!(option_u8(&area, OPTION_MSG_TYPE), Some(2));
        assert_eq!(option_addr(&area, OPTION_SERVER_ID), Some(Ipv4Addr::new(10, 0, 0, 1)));
        // Past the end marker.
        assert_eq!(find_option(&area, OPTION_ROUTER), None);
    }

    #[test]
    fn test_lookup_rejects_overrun() {
        let area = [OPTION_LEASE_TIME, 4, 0, 0];
        assert_eq!(find_option(&area, OPTION_LEASE_TIME), None);
        assert_eq!(option_u32(&[OPTION_LEASE_TIME, 2, 0, 1, 255], OPTION_LEASE_TIME), None);
    }

    #[test]
    fn test_writer_builds_and_terminates() {
        let mut area = [0u8; 16];
        let mut w = OptionWriter::new(&mut area);
        assert_eq!(w.put(OPTION_MSG_TYPE, &OptionValue::from_u8(1).unwrap()), Ok(3));
        assert_eq!(w.put(OPTION_LEASE_TIME, &OptionValue::from_u32(3600).unwrap()), Ok(9));
        assert_eq!(w.finish(), Ok(10));
        assert_eq!(option_u32(&area, OPTION_LEASE_TIME), Some(3600));
        assert_eq!(area[9], OPTION_END);
    }

    #[test]
    fn test_writer_refuses_overflow() {
        let mut area = [0u8; 8];
        let mut w = OptionWriter::new(&mut area);
        assert_eq!(w.put(OPTION_LEASE_TIME, &OptionValue::from_u32(1).unwrap()), Ok(6));
        assert_eq!(
            w.put(OPTION_MSG_TYPE, &OptionValue::from_u8(1).unwrap()),
            Err(NetError::NoBufferSpace)
        );
        assert_eq!(w.finish(), Ok(7));
    }

    #[test]
    fn test_value_constructors() {
        assert_eq!(OptionValue::from_u8(5).unwrap().as_slice(), &[5]);
        assert_eq!(OptionValue::from_u32(3600).unwrap().as_slice(), &[0, 0, 0x0e, 0x10]);
        assert_eq!(
            OptionValue::from_addr(Ipv4Addr::new(192, 168, 1, 1)).unwrap().as_slice(),
            &[192, 168, 1, 1]
        );
    }

    #[test]
    fn test_value_capacity() {
        assert!(OptionValue::from_slice(&[0; MAX_OPTION_VALUE]).is_ok());
        assert_eq!(
            OptionValue::from_slice(&[0; MAX_OPTION_VALUE + 1]),
            Err(NetError::InvalidArgument)
        );
    }
}
