//! DHCP client state machine.
//!
//! The session never touches the wire.  Timer expiries, server replies and
//! operator commands go in; the session updates itself and the address
//! configuration, re-arms its timers, and returns a [`DhcpActions`] naming
//! at most one message for the poll loop to build and send.
//!
//! Any event that does not apply to the current state is a no-op.  Stale
//! timer events from a previous state are harmless for the same reason.

use picoeth_lib::{klog_debug, klog_info, klog_warn};

use crate::config::AddressConfig;
use crate::netstack::PollEvents;
use crate::timer::{Scheduler, TimerEvents, TimerKind};
use crate::types::{Ipv4Addr, MacAddr};

use super::{DhcpOutbound, DhcpReply, DhcpRequestKind, MSG_ACK, MSG_NAK, MSG_OFFER};

/// DISCOVER, RENEW and REBIND are repeated at this interval until answered.
pub const RETRANSMIT_INTERVAL_SECS: u32 = 15;
/// Time an acknowledged address must survive without an ARP conflict.
pub const ADDRESS_GRACE_SECS: u32 = 2;
/// Wait after a DECLINE before starting over.
pub const DECLINE_BACKOFF_SECS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpState {
    /// DHCP disabled; addresses come from storage.
    Static,
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

impl DhcpState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Static => "STATIC",
            Self::Init => "INIT",
            Self::Selecting => "SELECTING",
            Self::Requesting => "REQUESTING",
            Self::Bound => "BOUND",
            Self::Renewing => "RENEWING",
            Self::Rebinding => "REBINDING",
        }
    }

    /// States that hold a confirmed lease.
    pub const fn is_leased(self) -> bool {
        matches!(self, Self::Bound | Self::Renewing | Self::Rebinding)
    }
}

/// Work the poll loop must do after a session step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpActions {
    /// Message to build and transmit.
    pub send: Option<DhcpRequestKind>,
    /// Announce the acknowledged address with a gratuitous ARP.
    pub announce: bool,
    pub events: PollEvents,
}

impl DhcpActions {
    pub const NONE: Self = Self {
        send: None,
        announce: false,
        events: PollEvents::empty(),
    };

    const fn send(kind: DhcpRequestKind) -> Self {
        Self {
            send: Some(kind),
            announce: false,
            events: PollEvents::empty(),
        }
    }
}

impl Default for DhcpActions {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug)]
pub struct DhcpSession {
    state: DhcpState,
    xid: u32,
    /// Address from the last accepted OFFER; after the ACK, the address
    /// awaiting its ARP grace period.
    offered_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    server_mac: MacAddr,
    /// Lease time from the OFFER, echoed in the REQUEST.
    offer_lease_secs: u32,
    lease_secs: u32,
    renewal_secs: u32,
    rebinding_secs: u32,
    /// ACK received while REQUESTING; waiting for `AddressSafe`.
    acked: bool,
    /// INIT entered through a DECLINE; wait for `DeclineBackoff`.
    holdoff: bool,
}

impl DhcpSession {
    pub fn new(mac: MacAddr, dhcp_enabled: bool) -> Self {
        let m = mac.as_bytes();
        Self {
            state: if dhcp_enabled {
                DhcpState::Init
            } else {
                DhcpState::Static
            },
            xid: u32::from_be_bytes([m[2], m[3], m[4], m[5]]),
            offered_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_mac: MacAddr::ZERO,
            offer_lease_secs: 0,
            lease_secs: 0,
            renewal_secs: 0,
            rebinding_secs: 0,
            acked: false,
            holdoff: false,
        }
    }

    #[inline]
    pub fn state(&self) -> DhcpState {
        self.state
    }

    #[inline]
    pub fn xid(&self) -> u32 {
        self.xid
    }

    #[inline]
    pub fn offered_ip(&self) -> Ipv4Addr {
        self.offered_ip
    }

    #[inline]
    pub fn server_ip(&self) -> Ipv4Addr {
        self.server_ip
    }

    /// Lease, T1 and T2 of the current lease, in seconds.
    pub fn lease_times(&self) -> (u32, u32, u32) {
        (self.lease_secs, self.renewal_secs, self.rebinding_secs)
    }

    /// The address being checked for conflicts, while in the ARP grace
    /// period.
    pub fn conflict_candidate(&self) -> Option<Ipv4Addr> {
        (self.state == DhcpState::Requesting && self.acked).then_some(self.offered_ip)
    }

    fn set_state(&mut self, next: DhcpState) {
        if self.state != next {
            klog_debug!("dhcp: {} -> {}", self.state.name(), next.name());
            self.state = next;
        }
    }

    /// Snapshot of everything needed to build `kind` right now.
    pub fn outbound(&self, kind: DhcpRequestKind, cfg: &AddressConfig) -> DhcpOutbound {
        DhcpOutbound {
            kind,
            mac: cfg.mac,
            xid: self.xid,
            client_ip: cfg.ip,
            requested_ip: self.offered_ip,
            server_ip: self.server_ip,
            server_mac: self.server_mac,
            lease_secs: self.offer_lease_secs,
        }
    }

    // =========================================================================
    // Timer-driven steps
    // =========================================================================

    /// Run one poll iteration's worth of state-machine work for the timer
    /// `events` drained from the inbox.
    ///
    /// Steps run in a fixed order; when several want to send, the last one
    /// wins, so at most one message leaves per iteration.
    pub fn service<S: Scheduler>(
        &mut self,
        events: TimerEvents,
        cfg: &mut AddressConfig,
        sched: &S,
    ) -> DhcpActions {
        let mut act = DhcpActions::NONE;

        if events.contains(TimerEvents::DECLINE_BACKOFF) && self.holdoff {
            klog_debug!("dhcp: decline backoff over");
            self.holdoff = false;
        }

        if self.state == DhcpState::Init && !self.holdoff {
            self.xid = self.xid.wrapping_add(1);
            sched.schedule_periodic(TimerKind::DiscoverRetransmit, RETRANSMIT_INTERVAL_SECS);
            act.send = Some(DhcpRequestKind::Discover);
            self.set_state(DhcpState::Selecting);
        }

        if events.contains(TimerEvents::DISCOVER_RETRANSMIT)
            && matches!(self.state, DhcpState::Selecting | DhcpState::Requesting)
            && !self.acked
        {
            act.send = Some(DhcpRequestKind::Discover);
            self.set_state(DhcpState::Selecting);
        }

        if events.contains(TimerEvents::ADDRESS_SAFE)
            && self.state == DhcpState::Requesting
            && self.acked
        {
            self.acked = false;
            self.set_state(DhcpState::Bound);
            act.events |= PollEvents::ADDRESS_BOUND;
            klog_info!("dhcp: bound to {} for {}s", cfg.ip, self.lease_secs);
        }

        if events.contains(TimerEvents::RENEWAL_START) && self.state == DhcpState::Bound {
            self.set_state(DhcpState::Renewing);
            sched.schedule_periodic(TimerKind::RenewRetransmit, RETRANSMIT_INTERVAL_SECS);
            act.send = Some(DhcpRequestKind::Renew);
        }

        if events.contains(TimerEvents::RENEW_RETRANSMIT) && self.state == DhcpState::Renewing {
            act.send = Some(DhcpRequestKind::Renew);
        }

        if events.contains(TimerEvents::REBIND_START)
            && matches!(self.state, DhcpState::Bound | DhcpState::Renewing)
        {
            sched.cancel(TimerKind::RenewRetransmit);
            self.set_state(DhcpState::Rebinding);
            sched.schedule_periodic(TimerKind::RebindRetransmit, RETRANSMIT_INTERVAL_SECS);
            act.send = Some(DhcpRequestKind::Rebind);
        }

        if events.contains(TimerEvents::REBIND_RETRANSMIT) && self.state == DhcpState::Rebinding {
            act.send = Some(DhcpRequestKind::Rebind);
        }

        if events.contains(TimerEvents::LEASE_EXPIRED) && self.state.is_leased() {
            sched.cancel(TimerKind::RenewRetransmit);
            sched.cancel(TimerKind::RebindRetransmit);
            klog_warn!("dhcp: lease on {} expired", cfg.ip);
            cfg.ip = Ipv4Addr::UNSPECIFIED;
            self.set_state(DhcpState::Init);
            // The lease is gone; nothing may be sent for it.
            act.send = None;
        }

        act
    }

    // =========================================================================
    // Server replies
    // =========================================================================

    /// Act on a reply already matched to this client and transaction.
    pub fn on_reply<S: Scheduler>(
        &mut self,
        reply: &DhcpReply,
        cfg: &mut AddressConfig,
        sched: &S,
    ) -> DhcpActions {
        match (reply.message_type, self.state) {
            (MSG_OFFER, DhcpState::Selecting) => self.on_offer(reply),
            (
                MSG_ACK,
                DhcpState::Requesting | DhcpState::Renewing | DhcpState::Rebinding,
            ) => self.on_ack(reply, cfg, sched),
            (MSG_NAK, _) => {
                klog_debug!("dhcp: NAK ignored in {}", self.state.name());
                DhcpActions::NONE
            }
            (msg, state) => {
                klog_debug!("dhcp: message type {} ignored in {}", msg, state.name());
                DhcpActions::NONE
            }
        }
    }

    fn on_offer(&mut self, reply: &DhcpReply) -> DhcpActions {
        let (Some(server_id), Some(lease)) = (reply.server_id, reply.lease_secs) else {
            klog_debug!("dhcp: OFFER without server id or lease ignored");
            return DhcpActions::NONE;
        };
        if reply.yiaddr.is_unspecified() {
            klog_debug!("dhcp: OFFER without address ignored");
            return DhcpActions::NONE;
        }
        self.offered_ip = reply.yiaddr;
        self.server_ip = server_id;
        self.server_mac = reply.server_mac;
        self.offer_lease_secs = lease;
        self.acked = false;
        klog_info!("dhcp: offered {} by {}", reply.yiaddr, server_id);
        self.set_state(DhcpState::Requesting);
        DhcpActions::send(DhcpRequestKind::Request)
    }

    fn on_ack<S: Scheduler>(
        &mut self,
        reply: &DhcpReply,
        cfg: &mut AddressConfig,
        sched: &S,
    ) -> DhcpActions {
        let (Some(server_id), Some(lease)) = (reply.server_id, reply.lease_secs) else {
            klog_debug!("dhcp: ACK without server id or lease ignored");
            return DhcpActions::NONE;
        };
        if self.state == DhcpState::Requesting && self.acked {
            return DhcpActions::NONE;
        }

        // Timers of the previous lease must not fire into the new one.
        sched.cancel_all();

        let ip = if reply.yiaddr.is_unspecified() {
            self.offered_ip
        } else {
            reply.yiaddr
        };
        self.offered_ip = ip;
        cfg.ip = ip;
        if let Some(mask) = reply.subnet_mask {
            cfg.subnet_mask = mask;
        }
        if let Some(router) = reply.router {
            cfg.gateway = router;
        }
        if let Some(dns) = reply.dns {
            cfg.dns = dns;
        }
        self.server_ip = server_id;
        self.server_mac = reply.server_mac;

        let (t1, t2) = lease_timers(lease, reply.renewal_secs, reply.rebinding_secs);
        self.lease_secs = lease;
        self.renewal_secs = t1;
        self.rebinding_secs = t2;
        sched.schedule_once(TimerKind::RenewalStart, t1);
        sched.schedule_once(TimerKind::RebindStart, t2);
        sched.schedule_once(TimerKind::LeaseExpired, lease);

        if self.state == DhcpState::Requesting {
            sched.schedule_once(TimerKind::AddressSafe, ADDRESS_GRACE_SECS);
            self.acked = true;
            klog_info!("dhcp: {} acknowledged, checking for conflicts", ip);
            DhcpActions {
                send: None,
                announce: true,
                events: PollEvents::empty(),
            }
        } else {
            klog_info!("dhcp: lease on {} extended by {}s", ip, lease);
            self.set_state(DhcpState::Bound);
            DhcpActions::NONE
        }
    }

    /// Another host answered for the address we were just given.
    pub fn on_address_conflict<S: Scheduler>(
        &mut self,
        cfg: &mut AddressConfig,
        sched: &S,
    ) -> DhcpActions {
        if self.conflict_candidate().is_none() {
            return DhcpActions::NONE;
        }
        klog_warn!("dhcp: {} already in use, declining", self.offered_ip);
        sched.cancel_all();
        sched.schedule_once(TimerKind::DeclineBackoff, DECLINE_BACKOFF_SECS);
        cfg.ip = Ipv4Addr::UNSPECIFIED;
        self.acked = false;
        self.holdoff = true;
        self.set_state(DhcpState::Init);
        DhcpActions {
            send: Some(DhcpRequestKind::Decline),
            announce: false,
            events: PollEvents::ADDRESS_CONFLICT,
        }
    }

    // =========================================================================
    // Operator commands
    // =========================================================================

    /// `dhcp on`: start from INIT.  The next [`service`](Self::service)
    /// sends the DISCOVER.
    pub fn enable<S: Scheduler>(&mut self, sched: &S) {
        sched.cancel_all();
        self.acked = false;
        self.holdoff = false;
        self.set_state(DhcpState::Init);
    }

    /// `dhcp off`.
    pub fn disable<S: Scheduler>(&mut self, sched: &S) {
        sched.cancel_all();
        self.acked = false;
        self.holdoff = false;
        self.set_state(DhcpState::Static);
    }

    /// `dhcp refresh`: renew now.  `None` while DHCP is off.
    pub fn refresh<S: Scheduler>(&mut self, sched: &S) -> Option<DhcpActions> {
        match self.state {
            DhcpState::Static => None,
            DhcpState::Bound => {
                self.set_state(DhcpState::Renewing);
                sched.schedule_periodic(TimerKind::RenewRetransmit, RETRANSMIT_INTERVAL_SECS);
                Some(DhcpActions::send(DhcpRequestKind::Renew))
            }
            DhcpState::Renewing => Some(DhcpActions::send(DhcpRequestKind::Renew)),
            DhcpState::Rebinding => Some(DhcpActions::send(DhcpRequestKind::Rebind)),
            DhcpState::Init | DhcpState::Selecting | DhcpState::Requesting => {
                self.enable(sched);
                Some(DhcpActions::NONE)
            }
        }
    }

    /// `dhcp release`: give the lease back and fall back to static
    /// configuration.  `None` while DHCP is off.
    pub fn release<S: Scheduler>(&mut self, sched: &S) -> Option<DhcpActions> {
        if self.state == DhcpState::Static {
            return None;
        }
        let had_lease = self.state.is_leased() || self.acked;
        self.disable(sched);
        Some(if had_lease {
            klog_info!("dhcp: releasing lease from {}", self.server_ip);
            DhcpActions::send(DhcpRequestKind::Release)
        } else {
            DhcpActions::NONE
        })
    }
}

/// T1 and T2 for a lease: the server's values when given, otherwise 50% and
/// 87.5% of the lease.  Kept ordered so that T1 <= T2 <= lease.
pub fn lease_timers(lease: u32, renewal: Option<u32>, rebinding: Option<u32>) -> (u32, u32) {
    let t2 = rebinding
        .unwrap_or(((lease as u64 * 7) / 8) as u32)
        .min(lease);
    let t1 = renewal.unwrap_or(lease / 2).min(t2);
    (t1, t2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAC;
    use crate::timer::NetTimers;

    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 60);

    fn reply(message_type: u8, lease: Option<u32>) -> DhcpReply {
        DhcpReply {
            message_type,
            yiaddr: OFFERED,
            server_id: Some(SERVER),
            server_mac: MacAddr([0x10, 0, 0, 0, 0, 1]),
            lease_secs: lease,
            renewal_secs: None,
            rebinding_secs: None,
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            router: Some(SERVER),
            dns: Some(Ipv4Addr::new(8, 8, 8, 8)),
        }
    }

    fn selecting() -> (DhcpSession, AddressConfig, NetTimers) {
        let mut cfg = AddressConfig::unconfigured(DEFAULT_MAC);
        cfg.dhcp_enabled = true;
        let timers = NetTimers::new();
        let mut s = DhcpSession::new(DEFAULT_MAC, true);
        let act = s.service(TimerEvents::empty(), &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Discover));
        assert_eq!(s.state(), DhcpState::Selecting);
        (s, cfg, timers)
    }

    fn bound() -> (DhcpSession, AddressConfig, NetTimers) {
        let (mut s, mut cfg, timers) = selecting();
        s.on_reply(&reply(MSG_OFFER, Some(3600)), &mut cfg, &timers);
        s.on_reply(&reply(MSG_ACK, Some(3600)), &mut cfg, &timers);
        s.service(TimerEvents::ADDRESS_SAFE, &mut cfg, &timers);
        assert_eq!(s.state(), DhcpState::Bound);
        (s, cfg, timers)
    }

    #[test]
    fn test_lease_timer_defaults_and_overrides() {
        assert_eq!(lease_timers(3600, None, None), (1800, 3150));
        assert_eq!(lease_timers(3600, Some(600), Some(1200)), (600, 1200));
        assert_eq!(lease_timers(100, Some(500), None), (87, 87));
        assert_eq!(lease_timers(u32::MAX, None, None).1, 3_758_096_383);
    }

    #[test]
    fn test_static_session_ignores_everything() {
        let mut cfg = AddressConfig::unconfigured(DEFAULT_MAC);
        let timers = NetTimers::new();
        let mut s = DhcpSession::new(DEFAULT_MAC, false);
        let all = TimerEvents::all();
        assert_eq!(s.service(all, &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.on_reply(&reply(MSG_OFFER, Some(60)), &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.on_reply(&reply(MSG_ACK, Some(60)), &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Static);
        assert!(s.refresh(&timers).is_none());
        assert!(s.release(&timers).is_none());
    }

    #[test]
    fn test_offer_requires_server_id_and_lease() {
        let (mut s, mut cfg, timers) = selecting();
        assert_eq!(s.on_reply(&reply(MSG_OFFER, None), &mut cfg, &timers), DhcpActions::NONE);
        let mut no_server = reply(MSG_OFFER, Some(3600));
        no_server.server_id = None;
        assert_eq!(s.on_reply(&no_server, &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Selecting);

        let act = s.on_reply(&reply(MSG_OFFER, Some(3600)), &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Request));
        assert_eq!(s.state(), DhcpState::Requesting);
        let out = s.outbound(DhcpRequestKind::Request, &cfg);
        assert_eq!(out.requested_ip, OFFERED);
        assert_eq!(out.server_ip, SERVER);
        assert_eq!(out.lease_secs, 3600);
    }

    #[test]
    fn test_ack_in_selecting_ignored() {
        let (mut s, mut cfg, timers) = selecting();
        assert_eq!(s.on_reply(&reply(MSG_ACK, Some(3600)), &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Selecting);
        assert_eq!(cfg.ip, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_ack_arms_lease_timers_and_grace() {
        let (mut s, mut cfg, timers) = selecting();
        s.on_reply(&reply(MSG_OFFER, Some(3600)), &mut cfg, &timers);
        let act = s.on_reply(&reply(MSG_ACK, Some(3600)), &mut cfg, &timers);
        assert!(act.announce);
        assert_eq!(act.send, None);
        assert_eq!(cfg.ip, OFFERED);
        assert_eq!(cfg.gateway, SERVER);
        assert_eq!(cfg.dns, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(s.conflict_candidate(), Some(OFFERED));
        assert!(!timers.is_armed(TimerKind::DiscoverRetransmit));
        assert_eq!(timers.remaining(TimerKind::RenewalStart), Some(1800));
        assert_eq!(timers.remaining(TimerKind::RebindStart), Some(3150));
        assert_eq!(timers.remaining(TimerKind::LeaseExpired), Some(3600));
        assert_eq!(timers.remaining(TimerKind::AddressSafe), Some(ADDRESS_GRACE_SECS));

        let act = s.service(TimerEvents::ADDRESS_SAFE, &mut cfg, &timers);
        assert_eq!(act.events, PollEvents::ADDRESS_BOUND);
        assert_eq!(s.state(), DhcpState::Bound);
        assert_eq!(s.conflict_candidate(), None);
    }

    #[test]
    fn test_discover_retransmit_restarts_unanswered_request() {
        let (mut s, mut cfg, timers) = selecting();
        s.on_reply(&reply(MSG_OFFER, Some(3600)), &mut cfg, &timers);
        let act = s.service(TimerEvents::DISCOVER_RETRANSMIT, &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Discover));
        assert_eq!(s.state(), DhcpState::Selecting);
    }

    #[test]
    fn test_renew_rebind_expire() {
        let (mut s, mut cfg, timers) = bound();

        let act = s.service(TimerEvents::RENEWAL_START, &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Renew));
        assert_eq!(s.state(), DhcpState::Renewing);
        assert!(timers.is_armed(TimerKind::RenewRetransmit));

        let act = s.service(TimerEvents::RENEW_RETRANSMIT, &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Renew));

        let act = s.service(TimerEvents::REBIND_START, &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Rebind));
        assert_eq!(s.state(), DhcpState::Rebinding);
        assert!(!timers.is_armed(TimerKind::RenewRetransmit));
        assert!(timers.is_armed(TimerKind::RebindRetransmit));

        // A late renew tick is stale now.
        assert_eq!(s.service(TimerEvents::RENEW_RETRANSMIT, &mut cfg, &timers), DhcpActions::NONE);

        let act = s.service(TimerEvents::LEASE_EXPIRED, &mut cfg, &timers);
        assert_eq!(act.send, None);
        assert_eq!(s.state(), DhcpState::Init);
        assert_eq!(cfg.ip, Ipv4Addr::UNSPECIFIED);
        assert!(!timers.is_armed(TimerKind::RebindRetransmit));
    }

    #[test]
    fn test_ack_while_renewing_rebinds_lease() {
        let (mut s, mut cfg, timers) = bound();
        s.service(TimerEvents::RENEWAL_START, &mut cfg, &timers);
        let act = s.on_reply(&reply(MSG_ACK, Some(7200)), &mut cfg, &timers);
        assert_eq!(act, DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Bound);
        assert!(!timers.is_armed(TimerKind::RenewRetransmit));
        assert_eq!(timers.remaining(TimerKind::RenewalStart), Some(3600));
        assert_eq!(s.lease_times(), (7200, 3600, 6300));
    }

    #[test]
    fn test_ack_while_rebinding_restores_bound() {
        let (mut s, mut cfg, timers) = bound();
        s.service(TimerEvents::RENEWAL_START, &mut cfg, &timers);
        s.service(TimerEvents::REBIND_START, &mut cfg, &timers);
        assert_eq!(s.state(), DhcpState::Rebinding);
        assert!(timers.is_armed(TimerKind::RebindRetransmit));

        let mut ack = reply(MSG_ACK, Some(1000));
        ack.renewal_secs = Some(400);
        let act = s.on_reply(&ack, &mut cfg, &timers);
        assert_eq!(act, DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Bound);
        assert_eq!(cfg.ip, OFFERED);
        assert!(!timers.is_armed(TimerKind::RebindRetransmit));
        assert_eq!(timers.remaining(TimerKind::RenewalStart), Some(400));
        assert_eq!(timers.remaining(TimerKind::RebindStart), Some(875));
        assert_eq!(timers.remaining(TimerKind::LeaseExpired), Some(1000));
        assert_eq!(s.lease_times(), (1000, 400, 875));

        // Events of the abandoned rebind no longer act.
        assert_eq!(s.service(TimerEvents::REBIND_RETRANSMIT, &mut cfg, &timers), DhcpActions::NONE);
    }

    #[test]
    fn test_conflict_declines_and_backs_off() {
        let (mut s, mut cfg, timers) = selecting();
        s.on_reply(&reply(MSG_OFFER, Some(3600)), &mut cfg, &timers);
        s.on_reply(&reply(MSG_ACK, Some(3600)), &mut cfg, &timers);

        let act = s.on_address_conflict(&mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Decline));
        assert_eq!(act.events, PollEvents::ADDRESS_CONFLICT);
        assert_eq!(s.state(), DhcpState::Init);
        assert_eq!(cfg.ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(timers.active_count(), 1);
        assert_eq!(s.outbound(DhcpRequestKind::Decline, &cfg).requested_ip, OFFERED);

        // Held in INIT until the backoff expires.
        assert_eq!(s.service(TimerEvents::empty(), &mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Init);
        let act = s.service(TimerEvents::DECLINE_BACKOFF, &mut cfg, &timers);
        assert_eq!(act.send, Some(DhcpRequestKind::Discover));
        assert_eq!(s.state(), DhcpState::Selecting);
    }

    #[test]
    fn test_conflict_outside_grace_ignored() {
        let (mut s, mut cfg, timers) = bound();
        assert_eq!(s.on_address_conflict(&mut cfg, &timers), DhcpActions::NONE);
        assert_eq!(s.state(), DhcpState::Bound);
    }

    #[test]
    fn test_refresh_and_release() {
        let (mut s, _cfg, timers) = bound();
        let act = s.refresh(&timers).unwrap();
        assert_eq!(act.send, Some(DhcpRequestKind::Renew));
        assert_eq!(s.state(), DhcpState::Renewing);

        let act = s.release(&timers).unwrap();
        assert_eq!(act.send, Some(DhcpRequestKind::Release));
        assert_eq!(s.state(), DhcpState::Static);
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn test_release_without_lease_sends_nothing() {
        let (mut s, _cfg, timers) = selecting();
        assert_eq!(s.release(&timers), Some(DhcpActions::NONE));
        assert_eq!(s.state(), DhcpState::Static);
    }

    #[test]
    fn test_every_event_in_every_state_is_total() {
        let events = [
            TimerEvents::DISCOVER_RETRANSMIT,
            TimerEvents::RENEWAL_START,
            TimerEvents::RENEW_RETRANSMIT,
            TimerEvents::REBIND_START,
            TimerEvents::REBIND_RETRANSMIT,
            TimerEvents::LEASE_EXPIRED,
            TimerEvents::ADDRESS_SAFE,
            TimerEvents::DECLINE_BACKOFF,
        ];
        for ev in events {
            let (mut s, mut cfg, timers) = bound();
            let before = s.state();
            s.service(ev, &mut cfg, &timers);
            let expected = if ev == TimerEvents::RENEWAL_START {
                DhcpState::Renewing
            } else if ev == TimerEvents::REBIND_START {
                DhcpState::Rebinding
            } else if ev == TimerEvents::LEASE_EXPIRED {
                DhcpState::Init
            } else {
                before
            };
            assert_eq!(s.state(), expected, "event {:?}", ev);
        }
    }
}
