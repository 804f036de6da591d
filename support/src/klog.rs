//! Kernel-style logging.
//!
//! Log output funnels through a single swappable backend, the same shape as
//! a real kernel's klog: early on, output goes to a built-in fallback
//! (stderr here, COM1 in the bare-metal original); a host harness or test
//! fixture can register a different backend (e.g. one that captures lines
//! into a buffer for assertions) without touching call sites.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline]
fn is_enabled(level: KlogLevel) -> bool {
    (level as u8) <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

pub type KlogBackend = fn(fmt::Arguments<'_>);

fn stderr_backend(args: fmt::Arguments<'_>) {
    use std::io::Write;
    let mut out = std::io::stderr();
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
}

/// Backend used when no other has been registered. Stored as a slot index
/// rather than a raw pointer (see `register_backend`'s doc comment).
static BACKEND_SLOT: AtomicUsize = AtomicUsize::new(0);
static CUSTOM_BACKENDS: Mutex<Vec<KlogBackend>> = Mutex::new(Vec::new());

/// Register a backend that replaces the default stderr fallback.
///
/// Test fixtures use this to capture log lines instead of writing to
/// stderr (the same role the serial driver plays in the original kernel:
/// it swaps itself in once the hardware is ready).
pub fn register_backend(backend: KlogBackend) {
    let mut backends = CUSTOM_BACKENDS.lock().unwrap();
    backends.push(backend);
    BACKEND_SLOT.store(backends.len(), Ordering::Release);
}

pub fn reset_backend() {
    CUSTOM_BACKENDS.lock().unwrap().clear();
    BACKEND_SLOT.store(0, Ordering::Release);
}

fn dispatch(args: fmt::Arguments<'_>) {
    let slot = BACKEND_SLOT.load(Ordering::Acquire);
    if slot == 0 {
        stderr_backend(args);
        return;
    }
    let backend = CUSTOM_BACKENDS.lock().unwrap().get(slot - 1).copied();
    match backend {
        Some(backend) => backend(args),
        None => stderr_backend(args),
    }
}

pub fn set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Emit a formatted line at the given level. The backend appends the
/// trailing newline — callers should not include one in their format string.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(args);
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Error, ::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Warn, ::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Info, ::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Debug, ::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Trace, ::std::format_args!($($arg)*))
    };
}
