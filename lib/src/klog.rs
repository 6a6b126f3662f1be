//! Firmware logging.
//!
//! Log lines are filtered by a global maximum level and handed, one
//! [`KlogRecord`] at a time, to a single sink function registered by the
//! board once its console UART is running.  Until a sink is registered,
//! lines are counted and discarded.
//!
//! The protocol engine logs only from the poll loop, never from the timer
//! interrupt, so the sink is never re-entered.
//!
//! ```ignore
//! fn uart_sink(record: &KlogRecord<'_>) {
//!     let _ = writeln!(Uart, "[{}] {}", record.level.tag(), record.args);
//! }
//! picoeth_lib::klog::klog_register_backend(uart_sink);
//! ```

use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};

/// Severity, most severe first.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

const LEVELS: [KlogLevel; 5] = [
    KlogLevel::Error,
    KlogLevel::Warn,
    KlogLevel::Info,
    KlogLevel::Debug,
    KlogLevel::Trace,
];

impl KlogLevel {
    pub const DEFAULT: Self = KlogLevel::Info;

    pub const fn name(self) -> &'static str {
        match self {
            KlogLevel::Error => "error",
            KlogLevel::Warn => "warn",
            KlogLevel::Info => "info",
            KlogLevel::Debug => "debug",
            KlogLevel::Trace => "trace",
        }
    }

    /// Fixed-width tag for console prefixes.
    pub const fn tag(self) -> &'static str {
        match self {
            KlogLevel::Error => "ERR ",
            KlogLevel::Warn => "WARN",
            KlogLevel::Info => "INFO",
            KlogLevel::Debug => "DBG ",
            KlogLevel::Trace => "TRC ",
        }
    }
}

impl FromStr for KlogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        LEVELS
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// One log line as seen by the sink.  `args` carries no line terminator.
pub struct KlogRecord<'a> {
    pub level: KlogLevel,
    pub args: fmt::Arguments<'a>,
}

/// Sink signature.  The sink appends its own line terminator.
pub type KlogBackend = fn(&KlogRecord<'_>);

static MAX_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::DEFAULT as u8);
/// `null` while no sink is registered.
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static DISCARDED: AtomicU32 = AtomicU32::new(0);

/// Register the sink.  Replaces any earlier one.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

pub fn klog_clear_backend() {
    BACKEND.store(core::ptr::null_mut(), Ordering::Release);
}

/// Restore the boot-time level.
pub fn klog_init() {
    klog_set_level(KlogLevel::DEFAULT);
}

pub fn klog_set_level(level: KlogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    let raw = MAX_LEVEL.load(Ordering::Relaxed) as usize;
    LEVELS[raw.min(LEVELS.len() - 1)]
}

#[inline]
pub fn is_enabled_level(level: KlogLevel) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Lines that passed the level filter while no sink was registered.
pub fn klog_discarded() -> u32 {
    DISCARDED.load(Ordering::Relaxed)
}

/// Filter and deliver one line.  Use the macros instead of calling this.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled_level(level) {
        return;
    }
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        DISCARDED.fetch_add(1, Ordering::Relaxed);
        return;
    }
    // SAFETY: only `klog_register_backend` stores a non-null value, and it
    // stores a `KlogBackend`; fn pointers and `*mut ()` have the same size.
    let backend = unsafe { core::mem::transmute::<*mut (), KlogBackend>(ptr) };
    backend(&KlogRecord { level, args });
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::klog::log_args($level, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static WARNINGS: AtomicUsize = AtomicUsize::new(0);
    static OTHERS: AtomicUsize = AtomicUsize::new(0);

    fn counting_backend(record: &KlogRecord<'_>) {
        if record.level == KlogLevel::Warn {
            WARNINGS.fetch_add(1, Ordering::SeqCst);
        } else {
            OTHERS.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Level and sink are process-wide, so everything is checked in one test.
    #[test]
    fn test_level_filter_and_backend() {
        klog_register_backend(counting_backend);
        klog_set_level(KlogLevel::Warn);
        assert_eq!(klog_get_level(), KlogLevel::Warn);

        crate::klog_error!("error {}", 1);
        crate::klog_warn!("warn");
        crate::klog_info!("filtered");
        crate::klog_debug!("filtered {}", 2);
        assert_eq!(WARNINGS.load(Ordering::SeqCst), 1);
        assert_eq!(OTHERS.load(Ordering::SeqCst), 1);

        klog_clear_backend();
        let discarded = klog_discarded();
        crate::klog_error!("dropped");
        crate::klog_trace!("filtered");
        assert_eq!(klog_discarded(), discarded + 1);
        assert_eq!(OTHERS.load(Ordering::SeqCst), 1);

        klog_init();
        assert_eq!(klog_get_level(), KlogLevel::Info);
    }

    #[test]
    fn test_level_names() {
        assert_eq!("DEBUG".parse::<KlogLevel>(), Ok(KlogLevel::Debug));
        assert_eq!("verbose".parse::<KlogLevel>(), Err(()));
        assert_eq!(KlogLevel::Warn.tag().len(), KlogLevel::Trace.tag().len());
        assert!(KlogLevel::Error < KlogLevel::Trace);
    }
}
