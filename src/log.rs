//! Structured logging for prepkit runs.
//!
//! Log levels:
//! - ERROR: The run is about to abort
//! - WARN: A task or step failed but the run continues
//! - INFO: Directory changes, command lines, run summaries
//! - DEBUG: Manifest resolution, directory stack traces
//! - TRACE: Environment and per-argument detail
//!
//! Records go to `~/.prepkit/prepkit.log`. With `--verbose` they are echoed
//! to stderr as well. Debug mode is enabled with `--debug` or `PREPKIT_DEBUG=1`;
//! `PREPKIT_DEBUG=trace` lowers the threshold to TRACE.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static ECHO_STDERR: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging to ~/.prepkit/prepkit.log.
///
/// `debug` lowers the threshold to DEBUG; `verbose` mirrors every record
/// that passes the threshold onto stderr.
pub fn init(debug: bool, verbose: bool) {
    let env = std::env::var("PREPKIT_DEBUG").ok();
    ECHO_STDERR.store(verbose, Ordering::SeqCst);
    LOG_LEVEL.store(threshold(debug, env.as_deref()) as u8, Ordering::SeqCst);

    if let Some(log_dir) = dirs::home_dir().map(|h| h.join(".prepkit")) {
        let _ = std::fs::create_dir_all(&log_dir);
        let path = log_dir.join("prepkit.log");
        // Each run starts a fresh log
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

fn threshold(debug: bool, env: Option<&str>) -> LogLevel {
    match env.map(str::to_lowercase).as_deref() {
        Some("trace") => LogLevel::Trace,
        Some("1") | Some("true") => LogLevel::Debug,
        _ if debug => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

fn format_record(level: LogLevel, msg: &str) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
    format!("[{}] [{}] {}", timestamp, level.as_str(), msg)
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    let record = format_record(level, msg);

    if ECHO_STDERR.load(Ordering::Relaxed) {
        eprintln!("{}", record);
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", record);
        }
    }
}

/// Log a message at INFO level.
pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at ERROR level.
pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level (only in debug mode).
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log a message at TRACE level (very verbose).
pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! plog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! plog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! plog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! plog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! plog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
