//! Boundary between the bus driver (which moves bytes to and from the
//! Ethernet controller) and the stack (which understands them).
//!
//! Only raw frames cross this boundary.  The driver owns the controller's
//! receive ring; the stack owns the single [`PacketBuffer`](crate::packetbuf::PacketBuffer)
//! the frames are copied into.

use crate::types::NetResult;

/// A byte-serial Ethernet MAC/PHY.
///
/// # Contract
///
/// - `receive` never blocks.  It copies the next pending frame into `buf`
///   and returns its length, or returns `0` when nothing is pending.
/// - `transmit` sends one complete frame.  It may wait for the controller,
///   but must give up after a bounded time and return
///   [`NetError::TransmitFailed`](crate::types::NetError::TransmitFailed).
/// - `overflow_pending` clears the controller's overflow condition as it
///   reports it.
pub trait NetDevice {
    fn receive(&mut self, buf: &mut [u8]) -> usize;

    fn transmit(&mut self, frame: &[u8]) -> NetResult;

    fn link_up(&self) -> bool;

    /// `true` once per receive-ring overflow.
    fn overflow_pending(&mut self) -> bool;
}

impl<D: NetDevice + ?Sized> NetDevice for &mut D {
    fn receive(&mut self, buf: &mut [u8]) -> usize {
        (**self).receive(buf)
    }

    fn transmit(&mut self, frame: &[u8]) -> NetResult {
        (**self).transmit(frame)
    }

    fn link_up(&self) -> bool {
        (**self).link_up()
    }

    fn overflow_pending(&mut self) -> bool {
        (**self).overflow_pending()
    }
}
