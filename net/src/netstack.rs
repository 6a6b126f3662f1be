//! The poll loop: one owner for the packet buffer, the address configuration
//! and both state machines.
//!
//! # Iteration
//!
//! Each [`NetStack::poll`] call:
//!
//! 1. runs the DHCP client for the timer events drained from the inbox and
//!    sends at most one DHCP message;
//! 2. takes at most one frame from the driver, classifies it and answers it
//!    in place in the same buffer.
//!
//! Console commands are applied between polls through [`NetStack::execute`].
//! Nothing here blocks except the driver's bounded transmit, and nothing here
//! is reachable from interrupt context: timers only raise inbox bits.

use core::fmt;

use bitflags::bitflags;
use picoeth_lib::{klog_debug, klog_info, klog_warn};

use crate::config::{AddressConfig, ConfigStore, StackConfig};
use crate::console::{Command, ConsoleError, DhcpCommand, write_ifconfig};
use crate::dhcp::{self, DhcpActions, DhcpReply, DhcpRequestKind, DhcpSession, DhcpState};
use crate::netdev::NetDevice;
use crate::packetbuf::PacketBuffer;
use crate::stats::{NetStats, bump};
use crate::tcp::{self, TcpControl, TcpHeader};
use crate::tcp_responder::{TcpResponder, TcpResponse, TcpState};
use crate::timer::{Scheduler, TimerEvents};
use crate::types::{Ipv4Addr, NetError, NetResult};
use crate::{arp, icmp, ipv4, udp};

/// Payload of every reply from the UDP service.
pub const UDP_REPLY: &[u8] = b"Received";

bitflags! {
    /// Things the board may want to show on its indicators after a poll.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PollEvents: u8 {
        /// The controller's receive ring overflowed.
        const OVERFLOW         = 1 << 0;
        /// A DHCP address passed its conflict check and is now in use.
        const ADDRESS_BOUND    = 1 << 1;
        /// A DHCP address was found in use by another host and declined.
        const ADDRESS_CONFLICT = 1 << 2;
        /// The UDP service received `on`.
        const LAMP_ON          = 1 << 3;
        /// The UDP service received `off`.
        const LAMP_OFF         = 1 << 4;
        /// The TCP peer closed the connection.
        const TCP_CLOSING      = 1 << 5;
    }
}

/// Result of a console command that the board must act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    /// `reboot`: the board should reset.
    Reboot,
}

/// What a received frame turned out to be.
#[derive(Clone, Copy, Debug)]
enum Inbound {
    AddressConflict,
    ArpRequest,
    Dhcp(DhcpReply),
    UdpService,
    EchoRequest,
    Tcp(TcpHeader),
    Drop(&'static str),
}

pub struct NetStack<D: NetDevice, S: Scheduler, C: ConfigStore> {
    device: D,
    scheduler: S,
    store: C,
    config: AddressConfig,
    dhcp: DhcpSession,
    tcp: TcpResponder,
    stats: NetStats,
    buffer: PacketBuffer,
}

impl<D: NetDevice, S: Scheduler, C: ConfigStore> NetStack<D, S, C> {
    /// Load the address configuration from `store` and start in STATIC or
    /// INIT according to its DHCP flag.
    pub fn new(device: D, scheduler: S, store: C, settings: StackConfig) -> Self {
        let mut config = AddressConfig::load(&store, settings.mac);
        if config.dhcp_enabled {
            // The stored address is the static fallback, not ours to use.
            config.ip = Ipv4Addr::UNSPECIFIED;
        }
        klog_info!("net: {} {}", settings.mac, config);
        Self {
            device,
            scheduler,
            store,
            dhcp: DhcpSession::new(settings.mac, config.dhcp_enabled),
            config,
            tcp: TcpResponder::new(settings.listen_port, settings.initial_isn),
            stats: NetStats::default(),
            buffer: PacketBuffer::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &AddressConfig {
        &self.config
    }

    pub fn dhcp(&self) -> &DhcpSession {
        &self.dhcp
    }

    pub fn dhcp_state(&self) -> DhcpState {
        self.dhcp.state()
    }

    pub fn tcp(&self) -> &TcpResponder {
        &self.tcp
    }

    pub fn tcp_state(&self) -> TcpState {
        self.tcp.state()
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn link_up(&self) -> bool {
        self.device.link_up()
    }

    // =========================================================================
    // Poll
    // =========================================================================

    /// One loop iteration.  `events` is what the timer inbox held.
    pub fn poll(&mut self, events: TimerEvents) -> PollEvents {
        let act = self
            .dhcp
            .service(events, &mut self.config, &self.scheduler);
        let mut report = self.apply_dhcp(act);
        report |= self.receive_one();
        report
    }

    fn receive_one(&mut self) -> PollEvents {
        let len = self.device.receive(self.buffer.storage_mut());
        if len == 0 {
            return PollEvents::empty();
        }
        let mut report = PollEvents::empty();
        if self.device.overflow_pending() {
            bump(&mut self.stats.rx_overflows);
            klog_warn!("net: receive overflow");
            report |= PollEvents::OVERFLOW;
        }
        if self.buffer.set_len(len).is_err() {
            self.drop_frame("oversized frame");
            return report;
        }
        bump(&mut self.stats.rx_frames);

        match self.handle_frame() {
            Ok(events) => report | events,
            Err(err) => {
                klog_warn!("net: reply not sent: {}", err);
                report
            }
        }
    }

    fn classify(&self) -> Inbound {
        let frame = self.buffer.frame();
        let mac = self.config.mac;

        if let Some(candidate) = self.dhcp.conflict_candidate() {
            if arp::is_conflict(frame, candidate, mac) {
                return Inbound::AddressConflict;
            }
        }
        if arp::is_request_for(frame, self.config.ip) {
            return Inbound::ArpRequest;
        }
        if !ipv4::is_valid(frame) {
            return Inbound::Drop("not a valid IPv4 frame");
        }
        if dhcp::is_dhcp_reply(frame) {
            return match dhcp::parse_reply(frame, mac, self.dhcp.xid()) {
                Some(reply) => Inbound::Dhcp(reply),
                None => Inbound::Drop("DHCP reply for another client"),
            };
        }
        if ipv4::is_broadcast(frame) {
            return Inbound::Drop("broadcast datagram");
        }
        if !self.config.has_address() || !ipv4::is_unicast_to(frame, self.config.ip) {
            return Inbound::Drop("datagram for another host");
        }
        if udp::is_udp(frame) {
            return Inbound::UdpService;
        }
        if icmp::is_echo_request(frame) {
            return Inbound::EchoRequest;
        }
        if let Some(hdr) = tcp::parse(frame) {
            return Inbound::Tcp(hdr);
        }
        Inbound::Drop("unhandled protocol")
    }

    fn handle_frame(&mut self) -> NetResult<PollEvents> {
        let mac = self.config.mac;
        match self.classify() {
            Inbound::AddressConflict => {
                let act = self
                    .dhcp
                    .on_address_conflict(&mut self.config, &self.scheduler);
                Ok(self.apply_dhcp(act))
            }
            Inbound::ArpRequest => {
                arp::build_reply(&mut self.buffer, mac)?;
                self.transmit()?;
                bump(&mut self.stats.arp_replies);
                Ok(PollEvents::empty())
            }
            Inbound::Dhcp(reply) => {
                let act = self
                    .dhcp
                    .on_reply(&reply, &mut self.config, &self.scheduler);
                Ok(self.apply_dhcp(act))
            }
            Inbound::UdpService => self.answer_udp(),
            Inbound::EchoRequest => {
                icmp::build_echo_reply(&mut self.buffer, mac)?;
                self.transmit()?;
                bump(&mut self.stats.echo_replies);
                Ok(PollEvents::empty())
            }
            Inbound::Tcp(hdr) => self.answer_tcp(&hdr),
            Inbound::Drop(reason) => {
                self.drop_frame(reason);
                Ok(PollEvents::empty())
            }
        }
    }

    fn answer_udp(&mut self) -> NetResult<PollEvents> {
        let lamp = match udp::datagram(self.buffer.frame()) {
            Some((src, _, datagram)) => {
                klog_debug!("udp: {} bytes from {}:{}", datagram.payload().len(), src, datagram.src_port());
                lamp_command(datagram.payload())
            }
            None => PollEvents::empty(),
        };
        udp::build_response(&mut self.buffer, self.config.mac, UDP_REPLY)?;
        self.transmit()?;
        bump(&mut self.stats.udp_replies);
        Ok(lamp)
    }

    fn answer_tcp(&mut self, hdr: &TcpHeader) -> NetResult<PollEvents> {
        let mac = self.config.mac;
        match self.tcp.on_segment(hdr) {
            TcpResponse::Ignore => Ok(PollEvents::empty()),
            TcpResponse::Send {
                seq,
                ack,
                flags,
                payload,
            } => {
                tcp::build_reply(&mut self.buffer, mac, seq, ack, flags, payload)?;
                self.transmit()?;
                bump(&mut self.stats.tcp_segments);
                Ok(PollEvents::empty())
            }
            TcpResponse::AckThenFin { seq, ack } => {
                tcp::build_reply(&mut self.buffer, mac, seq, ack, TcpControl::ACK, &[])?;
                // Already in FIN_WAIT_1: the FIN goes out even if the ACK did not.
                if self.transmit().is_ok() {
                    bump(&mut self.stats.tcp_segments);
                }
                tcp::rewrite_flags(&mut self.buffer, TcpControl::FIN | TcpControl::ACK)?;
                self.transmit()?;
                bump(&mut self.stats.tcp_segments);
                Ok(PollEvents::TCP_CLOSING)
            }
        }
    }

    // =========================================================================
    // DHCP output
    // =========================================================================

    /// Carry out what the DHCP session asked for.  Send failures are logged
    /// and counted; the session's retransmit timers cover them.
    fn apply_dhcp(&mut self, act: DhcpActions) -> PollEvents {
        if act.announce {
            let announced = arp::build_gratuitous(&mut self.buffer, self.config.mac, self.config.ip)
                .and_then(|_| self.transmit());
            if let Err(err) = announced {
                klog_warn!("arp: announcement failed: {}", err);
            }
        }
        if let Some(kind) = act.send {
            if let Err(err) = self.send_dhcp(kind) {
                klog_warn!("dhcp: {} not sent: {}", kind.name(), err);
            }
        }
        act.events
    }

    fn send_dhcp(&mut self, kind: DhcpRequestKind) -> NetResult {
        let out = self.dhcp.outbound(kind, &self.config);
        dhcp::build_message(&mut self.buffer, &out)?;
        self.transmit()?;
        bump(&mut self.stats.dhcp_messages);
        klog_debug!("dhcp: sent {} xid {:#010x}", kind.name(), out.xid);
        Ok(())
    }

    // =========================================================================
    // Device
    // =========================================================================

    /// Hand the current frame to the driver.  Never retried.
    fn transmit(&mut self) -> NetResult {
        if !self.device.link_up() {
            bump(&mut self.stats.tx_errors);
            return Err(NetError::LinkDown);
        }
        match self.device.transmit(self.buffer.frame()) {
            Ok(()) => {
                bump(&mut self.stats.tx_frames);
                Ok(())
            }
            Err(err) => {
                bump(&mut self.stats.tx_errors);
                klog_warn!("net: transmit of {} bytes failed: {}", self.buffer.len(), err);
                Err(err)
            }
        }
    }

    fn drop_frame(&mut self, reason: &'static str) {
        bump(&mut self.stats.rx_dropped);
        klog_debug!("net: dropped {}-byte frame: {}", self.buffer.len(), reason);
    }

    // =========================================================================
    // Console
    // =========================================================================

    /// Parse and apply one console line.
    pub fn execute_line<W: fmt::Write>(
        &mut self,
        line: &str,
        out: &mut W,
    ) -> Result<CommandOutcome, ConsoleError> {
        let cmd = Command::parse(line)?;
        self.execute(cmd, out)
    }

    /// Apply one console command.  `ifconfig` writes its report to `out`.
    pub fn execute<W: fmt::Write>(
        &mut self,
        cmd: Command,
        out: &mut W,
    ) -> Result<CommandOutcome, ConsoleError> {
        match cmd {
            Command::Set { field, addr } => {
                if self.dhcp.state() != DhcpState::Static {
                    return Err(ConsoleError::DhcpModeOn);
                }
                self.config.persist(&mut self.store, field, addr);
            }
            Command::Dhcp(DhcpCommand::On) => {
                self.config.persist_dhcp_enabled(&mut self.store, true);
                self.config.ip = Ipv4Addr::UNSPECIFIED;
                self.dhcp.enable(&self.scheduler);
                klog_info!("dhcp: enabled");
            }
            Command::Dhcp(DhcpCommand::Off) => {
                self.dhcp.disable(&self.scheduler);
                self.config.persist_dhcp_enabled(&mut self.store, false);
                self.config.reload_static(&self.store);
                klog_info!("dhcp: disabled, using {}", self.config);
            }
            Command::Dhcp(DhcpCommand::Refresh) => {
                let act = self
                    .dhcp
                    .refresh(&self.scheduler)
                    .ok_or(ConsoleError::DhcpModeOff)?;
                self.apply_dhcp(act);
            }
            Command::Dhcp(DhcpCommand::Release) => {
                let act = self
                    .dhcp
                    .release(&self.scheduler)
                    .ok_or(ConsoleError::DhcpModeOff)?;
                // RELEASE carries the leased address, so it goes out before
                // the static configuration is reloaded.
                self.apply_dhcp(act);
                self.config.persist_dhcp_enabled(&mut self.store, false);
                self.config.reload_static(&self.store);
                klog_info!("dhcp: released, using {}", self.config);
            }
            Command::Ifconfig => {
                let link = self.device.link_up();
                if write_ifconfig(out, &self.config, self.dhcp.state(), link, &self.stats).is_err() {
                    klog_warn!("console: ifconfig output truncated");
                }
            }
            Command::Reboot => return Ok(CommandOutcome::Reboot),
        }
        Ok(CommandOutcome::Done)
    }
}

/// `on`/`off` switch the lamp.  Trailing NUL, CR and LF are ignored.
fn lamp_command(payload: &[u8]) -> PollEvents {
    let end = payload
        .iter()
        .rposition(|&b| !matches!(b, b'\0' | b'\r' | b'\n'))
        .map_or(0, |i| i + 1);
    match &payload[..end] {
        b"on" => PollEvents::LAMP_ON,
        b"off" => PollEvents::LAMP_OFF,
        _ => PollEvents::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lamp_command_trims_terminators() {
        assert_eq!(lamp_command(b"on"), PollEvents::LAMP_ON);
        assert_eq!(lamp_command(b"off\0"), PollEvents::LAMP_OFF);
        assert_eq!(lamp_command(b"on\r\n"), PollEvents::LAMP_ON);
        assert_eq!(lamp_command(b"only"), PollEvents::empty());
        assert_eq!(lamp_command(b"\r\n"), PollEvents::empty());
        assert_eq!(lamp_command(b""), PollEvents::empty());
    }
}
