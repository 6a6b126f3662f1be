//! Timer service for the DHCP client.
//!
//! Timers are identified by a [`TimerKind`], never by a callback.  Each kind
//! has exactly one slot, so arming a kind that is already armed replaces the
//! old schedule and cancelling is idempotent.  When a timer expires it only
//! raises its [`TimerEvents`] bit in an atomic inbox; the poll loop drains
//! the inbox once per iteration and does all protocol work itself.
//!
//! # Concurrency
//!
//! [`NetTimers::tick`] runs from the 1 Hz timer interrupt while the poll
//! loop schedules and cancels from thread context.  The slot table sits
//! behind a [`spin::Mutex`] that only the poll loop ever waits on: the
//! interrupt adds its second to an atomic backlog and applies the backlog
//! only if `try_lock` succeeds.  Whoever next holds the table replays any
//! seconds left behind, so a tick that lands inside a poll-loop critical
//! section is delayed rather than lost.  The inbox is a
//! lock-free [`AtomicU32`].

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use picoeth_lib::klog_trace;
use spin::Mutex;

// =============================================================================
// TimerKind
// =============================================================================

/// Every timer the stack uses.  Discriminants index the slot table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerKind {
    /// Resend DISCOVER while no offer has been accepted.
    DiscoverRetransmit = 0,
    /// T1: start renewing.
    RenewalStart = 1,
    /// Resend the unicast RENEW.
    RenewRetransmit = 2,
    /// T2: start rebinding.
    RebindStart = 3,
    /// Resend the broadcast REBIND.
    RebindRetransmit = 4,
    /// The lease ran out.
    LeaseExpired = 5,
    /// The ARP grace period after an ACK passed without a conflict.
    AddressSafe = 6,
    /// Wait after a DECLINE before discovering again.
    DeclineBackoff = 7,
}

/// Number of [`TimerKind`] variants.
pub const TIMER_KIND_COUNT: usize = 8;

impl TimerKind {
    pub const ALL: [TimerKind; TIMER_KIND_COUNT] = [
        Self::DiscoverRetransmit,
        Self::RenewalStart,
        Self::RenewRetransmit,
        Self::RebindStart,
        Self::RebindRetransmit,
        Self::LeaseExpired,
        Self::AddressSafe,
        Self::DeclineBackoff,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The inbox bit raised when this timer expires.
    pub const fn event(self) -> TimerEvents {
        match self {
            Self::DiscoverRetransmit => TimerEvents::DISCOVER_RETRANSMIT,
            Self::RenewalStart => TimerEvents::RENEWAL_START,
            Self::RenewRetransmit => TimerEvents::RENEW_RETRANSMIT,
            Self::RebindStart => TimerEvents::REBIND_START,
            Self::RebindRetransmit => TimerEvents::REBIND_RETRANSMIT,
            Self::LeaseExpired => TimerEvents::LEASE_EXPIRED,
            Self::AddressSafe => TimerEvents::ADDRESS_SAFE,
            Self::DeclineBackoff => TimerEvents::DECLINE_BACKOFF,
        }
    }
}

bitflags! {
    /// Expired timers, as delivered to the poll loop.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TimerEvents: u32 {
        const DISCOVER_RETRANSMIT = 1 << 0;
        const RENEWAL_START       = 1 << 1;
        const RENEW_RETRANSMIT    = 1 << 2;
        const REBIND_START        = 1 << 3;
        const REBIND_RETRANSMIT   = 1 << 4;
        const LEASE_EXPIRED       = 1 << 5;
        const ADDRESS_SAFE        = 1 << 6;
        const DECLINE_BACKOFF     = 1 << 7;
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// The timer operations the DHCP client needs.
///
/// All methods take `&self`: implementations are shared with an interrupt
/// handler and use interior mutability.
pub trait Scheduler {
    /// Fire `kind` once, `seconds` from now.
    fn schedule_once(&self, kind: TimerKind, seconds: u32);
    /// Fire `kind` every `seconds`, starting `seconds` from now.
    fn schedule_periodic(&self, kind: TimerKind, seconds: u32);
    /// Disarm `kind`.  Disarming an idle timer does nothing.
    fn cancel(&self, kind: TimerKind);
    fn cancel_all(&self);
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    fn schedule_once(&self, kind: TimerKind, seconds: u32) {
        (**self).schedule_once(kind, seconds)
    }

    fn schedule_periodic(&self, kind: TimerKind, seconds: u32) {
        (**self).schedule_periodic(kind, seconds)
    }

    fn cancel(&self, kind: TimerKind) {
        (**self).cancel(kind)
    }

    fn cancel_all(&self) {
        (**self).cancel_all()
    }
}

// =============================================================================
// NetTimers
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct TimerSlot {
    /// Seconds until expiry.
    remaining: u32,
    /// Reload value for periodic timers; `0` for one-shots.
    period: u32,
}

struct TimerTable {
    slots: [Option<TimerSlot>; TIMER_KIND_COUNT],
}

impl TimerTable {
    const fn new() -> Self {
        Self {
            slots: [None; TIMER_KIND_COUNT],
        }
    }

    /// One second passes.  Periodic timers reload; one-shots disarm.
    fn step(&mut self) -> TimerEvents {
        let mut fired = TimerEvents::empty();
        for kind in TimerKind::ALL {
            let slot = &mut self.slots[kind.index()];
            let Some(timer) = slot.as_mut() else {
                continue;
            };
            if timer.remaining > 1 {
                timer.remaining -= 1;
                continue;
            }
            fired |= kind.event();
            if timer.period > 0 {
                timer.remaining = timer.period;
            } else {
                *slot = None;
            }
        }
        fired
    }
}

/// Atomic set of pending [`TimerEvents`].
pub struct EventInbox(AtomicU32);

impl EventInbox {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    #[inline]
    pub fn raise(&self, events: TimerEvents) {
        self.0.fetch_or(events.bits(), Ordering::AcqRel);
    }

    /// Take and clear everything raised so far.
    #[inline]
    pub fn take(&self) -> TimerEvents {
        TimerEvents::from_bits_truncate(self.0.swap(0, Ordering::AcqRel))
    }

    #[inline]
    pub fn peek(&self) -> TimerEvents {
        TimerEvents::from_bits_truncate(self.0.load(Ordering::Acquire))
    }
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Second-granularity scheduler with one slot per [`TimerKind`].
///
/// ```ignore
/// static TIMERS: NetTimers = NetTimers::new();
///
/// // 1 Hz interrupt:
/// TIMERS.tick();
///
/// // poll loop:
/// let events = TIMERS.take_events();
/// stack.poll(events);
/// ```
pub struct NetTimers {
    table: Mutex<TimerTable>,
    /// Seconds counted by `tick` but not yet applied to the table.
    backlog: AtomicU32,
    inbox: EventInbox,
}

impl NetTimers {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(TimerTable::new()),
            backlog: AtomicU32::new(0),
            inbox: EventInbox::new(),
        }
    }

    /// Apply the backlog to a table the caller already holds.
    fn catch_up(&self, table: &mut TimerTable) {
        let seconds = self.backlog.swap(0, Ordering::AcqRel);
        let mut fired = TimerEvents::empty();
        for _ in 0..seconds {
            fired |= table.step();
        }
        if !fired.is_empty() {
            self.inbox.raise(fired);
        }
    }

    /// Poll-loop access to the table, with elapsed time applied first.
    fn with_table<R>(&self, f: impl FnOnce(&mut TimerTable) -> R) -> R {
        let mut table = self.table.lock();
        self.catch_up(&mut table);
        let result = f(&mut table);
        // Seconds that arrived while we held the lock.
        self.catch_up(&mut table);
        result
    }

    fn arm(&self, kind: TimerKind, seconds: u32, period: u32) {
        // A zero delay fires on the next tick.
        let remaining = seconds.max(1);
        self.with_table(|t| t.slots[kind.index()] = Some(TimerSlot { remaining, period }));
        klog_trace!("timer: {:?} armed for {}s", kind, remaining);
    }

    /// Count one second and, unless the poll loop holds the table, raise
    /// the events of the timers that expire.  Never blocks.
    pub fn tick(&self) {
        self.backlog.fetch_add(1, Ordering::AcqRel);
        if let Some(mut table) = self.table.try_lock() {
            self.catch_up(&mut table);
        }
    }

    /// Run `seconds` ticks back to back.
    pub fn advance(&self, seconds: u32) {
        for _ in 0..seconds {
            self.tick();
        }
    }

    /// Drain the inbox.  Called once per poll iteration.
    pub fn take_events(&self) -> TimerEvents {
        self.inbox.take()
    }

    pub fn pending_events(&self) -> TimerEvents {
        self.inbox.peek()
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.with_table(|t| t.slots[kind.index()].is_some())
    }

    /// Seconds until `kind` next fires, if armed.
    pub fn remaining(&self, kind: TimerKind) -> Option<u32> {
        self.with_table(|t| t.slots[kind.index()].map(|slot| slot.remaining))
    }

    /// Number of armed timers (diagnostic).
    pub fn active_count(&self) -> usize {
        self.with_table(|t| t.slots.iter().filter(|s| s.is_some()).count())
    }
}

impl Default for NetTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for NetTimers {
    fn schedule_once(&self, kind: TimerKind, seconds: u32) {
        self.arm(kind, seconds, 0);
    }

    fn schedule_periodic(&self, kind: TimerKind, seconds: u32) {
        self.arm(kind, seconds, seconds.max(1));
    }

    fn cancel(&self, kind: TimerKind) {
        self.with_table(|t| t.slots[kind.index()] = None);
    }

    fn cancel_all(&self) {
        self.with_table(|t| t.slots = [None; TIMER_KIND_COUNT]);
    }
}
