//! Logging sink consumed by the allocator and the asset cache.
//!
//! The core never formats or routes log output itself. It hands
//! `(severity, message)` pairs to a [`LogSink`]; the default sink forwards
//! them to `tracing`.
//!
//! With the `profiling` feature enabled, [`init_subscriber`] installs a
//! `tracing-subscriber` fmt layer:
//!
//! ```ignore
//! tracked_assets::logging::init_subscriber(tracing::Level::DEBUG);
//! ```

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;

/// Log severity, ordered from least to most severe
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogSeverity {
    Trace,
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Verbose => "VERBOSE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Warning => "WARNING",
            LogSeverity::Error => "ERROR",
            LogSeverity::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// Destination for diagnostic output
pub trait LogSink {
    fn log(&self, severity: LogSeverity, message: &str);
}

/// Forwards to the `tracing` macros.
///
/// `Verbose` has no tracing counterpart and maps to `debug`; `Fatal` maps to
/// `error` with a `fatal = true` field.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: LogSeverity, message: &str) {
        match severity {
            LogSeverity::Trace => tracing::trace!("{message}"),
            LogSeverity::Verbose | LogSeverity::Debug => tracing::debug!("{message}"),
            LogSeverity::Info => tracing::info!("{message}"),
            LogSeverity::Warning => tracing::warn!("{message}"),
            LogSeverity::Error => tracing::error!("{message}"),
            LogSeverity::Fatal => tracing::error!(fatal = true, "{message}"),
        }
    }
}

/// Keeps every line in memory. Used by diagnostics dumps and tests.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: RefCell<Vec<(LogSeverity, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of captured lines
    pub fn lines(&self) -> Vec<(LogSeverity, String)> {
        self.lines.borrow().clone()
    }

    /// Captured messages without severities
    pub fn messages(&self) -> Vec<String> {
        self.lines.borrow().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn count_at(&self, severity: LogSeverity) -> usize {
        self.lines
            .borrow()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl LogSink for BufferSink {
    fn log(&self, severity: LogSeverity, message: &str) {
        self.lines.borrow_mut().push((severity, message.to_string()));
    }
}

impl<S: LogSink + ?Sized> LogSink for std::rc::Rc<S> {
    fn log(&self, severity: LogSeverity, message: &str) {
        (**self).log(severity, message);
    }
}

/// Install a global fmt subscriber. Returns `false` if one was already set.
#[cfg(feature = "profiling")]
pub fn init_subscriber(max_level: tracing::Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .try_init()
        .is_ok()
}
