//! Logging capability injected into every client component
//!
//! The client never talks to a global logger directly. Components hold an
//! `Arc<dyn Logger>`; the default [`TracingLogger`] forwards to `tracing`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

const TARGET: &str = "batata_http_client";

/// Severity threshold for a [`Logger`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LogLevel::Debug,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl FromStr for LogLevel {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to `Info`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Logging sink used by the client.
///
/// Implementations must be cheap to call from background tasks.
pub trait Logger: Send + Sync + 'static {
    fn error(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn info(&self, msg: &str);
    fn debug(&self, msg: &str);
    fn set_level(&self, level: LogLevel);
}

/// Default logger that emits `tracing` events.
pub struct TracingLogger {
    level: AtomicU8,
}

impl TracingLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: AtomicU8::new(level as u8),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for TracingLogger {
    fn error(&self, msg: &str) {
        if self.enabled(LogLevel::Error) {
            tracing::error!(target: TARGET, "{}", msg);
        }
    }

    fn warn(&self, msg: &str) {
        if self.enabled(LogLevel::Warn) {
            tracing::warn!(target: TARGET, "{}", msg);
        }
    }

    fn info(&self, msg: &str) {
        if self.enabled(LogLevel::Info) {
            tracing::info!(target: TARGET, "{}", msg);
        }
    }

    fn debug(&self, msg: &str) {
        if self.enabled(LogLevel::Debug) {
            tracing::debug!(target: TARGET, "{}", msg);
        }
    }

    fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }
}

/// Logger that discards everything.
#[derive(Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn error(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn debug(&self, _msg: &str) {}
    fn set_level(&self, _level: LogLevel) {}
}
