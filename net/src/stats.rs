//! Stack counters, reported by `ifconfig`.

use core::fmt;

/// Monotonic counters kept by the poll loop.  All wrap on overflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetStats {
    /// Frames handed to the stack by the driver.
    pub rx_frames: u32,
    /// Frames no handler accepted.
    pub rx_dropped: u32,
    /// Receive-ring overflows reported by the controller.
    pub rx_overflows: u32,
    /// Frames the driver accepted for transmission.
    pub tx_frames: u32,
    /// Frames the driver failed to send.
    pub tx_errors: u32,
    pub arp_replies: u32,
    pub echo_replies: u32,
    pub udp_replies: u32,
    pub tcp_segments: u32,
    pub dhcp_messages: u32,
}

#[inline]
pub(crate) fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

impl fmt::Display for NetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "RX frames {}  dropped {}  overruns {}",
            self.rx_frames, self.rx_dropped, self.rx_overflows
        )?;
        writeln!(f, "TX frames {}  errors {}", self.tx_frames, self.tx_errors)?;
        write!(
            f,
            "ARP {}  ICMP {}  UDP {}  TCP {}  DHCP {}",
            self.arp_replies, self.echo_replies, self.udp_replies, self.tcp_segments, self.dhcp_messages
        )
    }
}
