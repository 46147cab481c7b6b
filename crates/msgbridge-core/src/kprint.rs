//! Kernel-style leveled logging for msgbridge
//!
//! Every line goes to stderr under the stderr lock, prefixed with the level
//! and the name of the emitting thread. Completion callbacks run on engine
//! worker threads, so the thread name is usually the first thing you need
//! when reading a log.
//!
//! # Environment Variables
//!
//! - `MSGB_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace or 0..=5
//!   (default: warn)
//! - `MSGB_FLUSH_EPRINT=1` - flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use msgbridge_core::{kinfo, kwarn};
//!
//! kinfo!("socket {} opened", id);
//! kwarn!("dropping message for full peer {}", peer);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Nothing is printed
    Off = 0,
    /// Failures the caller cannot see otherwise
    Error = 1,
    /// Suspicious but recoverable
    Warn = 2,
    /// Lifecycle events
    Info = 3,
    /// Per-operation detail
    Debug = 4,
    /// Everything
    Trace = 5,
}

impl LogLevel {
    /// Decode a stored level; values above 5 clamp to `Trace`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => return None,
        };
        Some(level)
    }

    /// Fixed-width tag printed before each line
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static INIT: Once = Once::new();
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Read `MSGB_LOG_LEVEL` / `MSGB_FLUSH_EPRINT`.
///
/// Runs once; later calls are no-ops. Called lazily by the first log line.
pub fn init() {
    INIT.call_once(|| {
        if std::env::var("MSGB_FLUSH_EPRINT").is_ok() {
            let flush = crate::env::env_get_bool("MSGB_FLUSH_EPRINT", false);
            FLUSH_ENABLED.store(flush, Ordering::Relaxed);
        }
        if let Ok(val) = std::env::var("MSGB_LOG_LEVEL") {
            let level = LogLevel::parse(&val).unwrap_or(LogLevel::Warn);
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
    });
}

/// Current log level
#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the log level. Takes precedence over the environment.
pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Override flush-after-each-line.
pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether lines at `level` are printed
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let current = std::thread::current();
    let thread = current.name().unwrap_or("-");
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} [{}] ", level.prefix(), thread);
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    init();
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Unconditional line to stderr
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Info, format_args!($($arg)*));
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Trace, format_args!($($arg)*));
    }};
}
