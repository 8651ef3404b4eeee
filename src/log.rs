//! File-based logging for convoy.
//!
//! Everything goes to `~/.convoy/convoy.log`, truncated at startup so
//! each run reads as one trace. The threshold is INFO unless raised at
//! init: `--debug` or `CONVOY_DEBUG=1` admits DEBUG, and
//! `CONVOY_DEBUG=trace` additionally admits TRACE (executor commands,
//! checkpoint writes).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Message severity, most urgent first.
///
/// A message is written when its level is at or above the configured
/// threshold (numerically, at or below it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

/// Open the log file and fix the threshold for this process.
///
/// Without a home directory the logger stays disabled; convoy still
/// runs, it just leaves no trace behind.
pub fn init_with_debug(debug: bool) {
    let env = std::env::var("CONVOY_DEBUG").unwrap_or_default().to_lowercase();
    let threshold = if env == "trace" {
        Level::Trace
    } else if debug || env == "1" || env == "true" {
        Level::Debug
    } else {
        Level::Info
    };
    THRESHOLD.store(threshold as u8, Ordering::SeqCst);

    let Some(home) = dirs::home_dir() else {
        return;
    };
    let dir = home.join(".convoy");
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let path = dir.join("convoy.log");
    let _ = std::fs::write(&path, "");
    let _ = LOG_FILE.set(path);
}

/// Append one timestamped line if `level` clears the threshold.
///
/// Called through the `clog*` macros; write failures are swallowed so
/// logging can never take the scheduler down.
pub fn write(level: Level, msg: &str) {
    if level as u8 > THRESHOLD.load(Ordering::Relaxed) {
        return;
    }
    let Some(path) = LOG_FILE.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", stamp, level.label(), msg);
    }
}

/// Log at INFO level.
#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Info, &format!($($arg)*))
    };
}

/// Log at ERROR level.
#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Error, &format!($($arg)*))
    };
}

/// Log at WARN level.
#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG level; dropped unless debug mode is on.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Debug, &format!($($arg)*))
    };
}

/// Log at TRACE level; dropped unless `CONVOY_DEBUG=trace`.
#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Trace, &format!($($arg)*))
    };
}
