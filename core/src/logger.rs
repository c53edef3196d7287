//! Three-channel logger sink owned by the processor.
//!
//! # Design
//! Callers plug in their own logging facility by implementing `LogSink`. The
//! processor holds the sink through an `Arc`, so the caller's handle and the
//! processor's copy have independent lifetimes: the sink stays alive until the
//! transport driver has been joined, whatever the caller does with its own
//! handle.
//!
//! Messages below the logger's `Severity` threshold are not forwarded.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Internal severity: 0 info, 1 warning, 2 error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl Severity {
    /// Map a conventional numeric verbosity level (0 notset, 10 debug, 20 info,
    /// 30 warning, 40 error, 50 critical) onto a severity.
    ///
    /// Unknown levels map to `Error`.
    pub fn from_verbosity(level: u32) -> Self {
        match level {
            0 | 10 | 20 => Severity::Info,
            30 => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Map the raw 0/1/2 index. Out-of-range values map to `Error`.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Severity::Info,
            1 => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Severity::Error
        } else if level == tracing::Level::WARN {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" | "debug" | "trace" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => other
                .parse::<u32>()
                .map(Severity::from_verbosity)
                .map_err(|_| format!("unknown log level: {s}")),
        }
    }
}

/// Destination for caller-visible log messages.
pub trait LogSink: Send + Sync {
    fn info(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Default sink forwarding to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, msg: &str) {
        tracing::info!(target: "ahr", "{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!(target: "ahr", "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "ahr", "{msg}");
    }
}

/// Severity-filtered handle on a `LogSink`.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    level: Severity,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, level: Severity) -> Self {
        Self { sink, level }
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn set_level(&mut self, level: Severity) {
        self.level = level;
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.level
    }

    pub fn log(&self, severity: Severity, msg: &str) {
        if !self.enabled(severity) {
            return;
        }
        match severity {
            Severity::Info => self.sink.info(msg),
            Severity::Warning => self.sink.warning(msg),
            Severity::Error => self.sink.error(msg),
        }
    }

    pub fn info(&self, msg: &str) {
        self.log(Severity::Info, msg);
    }

    pub fn warning(&self, msg: &str) {
        self.log(Severity::Warning, msg);
    }

    pub fn error(&self, msg: &str) {
        self.log(Severity::Error, msg);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Severity::Info)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}
