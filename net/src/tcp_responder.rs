//! Single-connection TCP responder.
//!
//! There is no connection table: one global state and one local sequence
//! counter (the ISN) serve whichever peer is talking.  Every ACK must carry
//! exactly the ISN as its acknowledgment number; anything else is dropped
//! without a reply and without a state change, which also discards stale
//! and duplicate segments.  Nothing is retransmitted.

use picoeth_lib::{klog_debug, klog_info};

use crate::tcp::{TcpControl, TcpHeader};

/// Fixed reply to any data received on an established connection.
pub const LINE_REPLY: &[u8] = b"Hello";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Listen,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    TimeWait,
    Closed,
}

impl TcpState {
    /// Human-readable name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Listen => "LISTEN",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::TimeWait => "TIME_WAIT",
            Self::Closed => "CLOSED",
        }
    }

    /// States in which a new SYN opens a connection.
    pub const fn accepts_syn(self) -> bool {
        matches!(self, Self::Listen | Self::TimeWait | Self::Closed)
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::SynReceived | Self::Established)
    }
}

/// What the poll loop must transmit in answer to a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpResponse {
    /// Nothing to send.
    Ignore,
    /// One segment.
    Send {
        seq: u32,
        ack: u32,
        flags: TcpControl,
        payload: &'static [u8],
    },
    /// An ACK followed by a FIN+ACK with the same numbers.
    AckThenFin { seq: u32, ack: u32 },
}

#[derive(Debug)]
pub struct TcpResponder {
    state: TcpState,
    port: u16,
    isn: u32,
    remote_seq: u32,
}

impl TcpResponder {
    pub const fn new(port: u16, initial_isn: u32) -> Self {
        Self {
            state: TcpState::Listen,
            port,
            isn: initial_isn,
            remote_seq: 0,
        }
    }

    #[inline]
    pub const fn state(&self) -> TcpState {
        self.state
    }

    #[inline]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Next local sequence number.
    #[inline]
    pub const fn isn(&self) -> u32 {
        self.isn
    }

    /// Next sequence number expected from the peer.
    #[inline]
    pub const fn remote_seq(&self) -> u32 {
        self.remote_seq
    }

    fn transition(&mut self, next: TcpState) {
        if self.state != next {
            klog_debug!("tcp: {} -> {}", self.state.name(), next.name());
            self.state = next;
        }
    }

    /// Advance the connection for one validated inbound segment and report
    /// what to send back.
    pub fn on_segment(&mut self, hdr: &TcpHeader) -> TcpResponse {
        if hdr.dst_port != self.port {
            return TcpResponse::Ignore;
        }

        if hdr.is_syn() {
            return self.on_syn(hdr);
        }

        if !hdr.is_ack() || hdr.ack_num != self.isn {
            klog_debug!(
                "tcp: dropped segment ack={} expected={} in {}",
                hdr.ack_num,
                self.isn,
                self.state.name()
            );
            return TcpResponse::Ignore;
        }

        if hdr.is_rst() {
            if self.state != TcpState::Listen {
                klog_debug!("tcp: reset by peer port {}", hdr.src_port);
                self.transition(TcpState::Closed);
            }
            return TcpResponse::Ignore;
        }

        if hdr.is_fin() {
            return self.on_fin(hdr);
        }

        match self.state {
            TcpState::SynReceived => {
                self.transition(TcpState::Established);
                klog_info!("tcp: connection established on port {}", self.port);
                self.on_data(hdr)
            }
            TcpState::Established => self.on_data(hdr),
            TcpState::FinWait1 => {
                self.transition(TcpState::TimeWait);
                TcpResponse::Ignore
            }
            _ => TcpResponse::Ignore,
        }
    }

    fn on_syn(&mut self, hdr: &TcpHeader) -> TcpResponse {
        if hdr.is_ack() || !self.state.accepts_syn() {
            klog_debug!("tcp: SYN ignored in {}", self.state.name());
            return TcpResponse::Ignore;
        }
        let seq = self.isn;
        let ack = hdr.seq_num.wrapping_add(1);
        self.isn = self.isn.wrapping_add(1);
        self.remote_seq = ack;
        self.transition(TcpState::SynReceived);
        TcpResponse::Send {
            seq,
            ack,
            flags: TcpControl::SYN | TcpControl::ACK,
            payload: &[],
        }
    }

    fn on_fin(&mut self, hdr: &TcpHeader) -> TcpResponse {
        if !self.state.is_connected() {
            return TcpResponse::Ignore;
        }
        let seq = self.isn;
        let ack = hdr
            .seq_num
            .wrapping_add(hdr.payload_len as u32)
            .wrapping_add(1);
        self.isn = self.isn.wrapping_add(1);
        self.remote_seq = ack;
        self.transition(TcpState::FinWait1);
        TcpResponse::AckThenFin { seq, ack }
    }

    fn on_data(&mut self, hdr: &TcpHeader) -> TcpResponse {
        if hdr.payload_len == 0 {
            return TcpResponse::Ignore;
        }
        let seq = self.isn;
        let ack = hdr.seq_num.wrapping_add(hdr.payload_len as u32);
        self.isn = self.isn.wrapping_add(LINE_REPLY.len() as u32);
        self.remote_seq = ack;
        TcpResponse::Send {
            seq,
            ack,
            flags: TcpControl::PSH | TcpControl::ACK,
            payload: LINE_REPLY,
        }
    }
}
