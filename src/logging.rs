//! Injected logging for the resolution engine.
//!
//! The resolver never logs through a global; it holds a [`Logger`] handed to it
//! by whoever built the engine. A logger outputs to up to two backends:
//! - tracing (stderr/file, whatever subscriber the binary installed)
//! - a caller-provided [`LogSink`]
//!
//! [`Logger::disabled`] is the default and emits nothing at all.

use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tracing::Level;

/// Severity of a resolution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Convert u8 back to LogLevel.
fn u8_to_level(val: u8) -> LogLevel {
    match val {
        0 => LogLevel::Trace,
        1 => LogLevel::Debug,
        2 => LogLevel::Info,
        3 => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

/// Convert LogLevel to tracing Level.
pub fn log_level_to_tracing(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Atomic level filter that can be adjusted while resolutions are running.
pub struct LogLevelFilter(AtomicU8);

impl LogLevelFilter {
    /// Create a new filter with the given minimum level.
    pub fn new(level: LogLevel) -> Self {
        Self(AtomicU8::new(level as u8))
    }

    /// Get the current minimum level.
    pub fn get(&self) -> LogLevel {
        u8_to_level(self.0.load(Ordering::Relaxed))
    }

    /// Set the minimum level.
    pub fn set(&self, level: LogLevel) {
        self.0.store(level as u8, Ordering::Relaxed);
    }

    /// Check if a message at the given level should be logged.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level as u8 >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::Trace)
    }
}

/// A single resolution event, as handed to a [`LogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Recursion depth of the resolution that emitted the event.
    pub depth: usize,
    pub message: String,
}

/// Receiver for resolution events.
pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord);
}

/// Logger handed to the resolver.
#[derive(Clone)]
pub struct Logger {
    /// Forward to `tracing` macros.
    tracing: bool,
    /// Caller-provided receiver (optional).
    sink: Option<Arc<dyn LogSink>>,
    /// Minimum level to log.
    level_filter: Arc<LogLevelFilter>,
    /// Logger name/category.
    name: Option<String>,
}

impl Logger {
    /// A logger that discards everything.
    pub fn disabled() -> Self {
        Self {
            tracing: false,
            sink: None,
            level_filter: Arc::new(LogLevelFilter::default()),
            name: None,
        }
    }

    /// A logger that forwards to `tracing`.
    pub fn tracing() -> Self {
        Self {
            tracing: true,
            ..Self::disabled()
        }
    }

    /// Also forward records to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the level filter.
    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// Set the logger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// True when no backend is attached.
    pub fn is_disabled(&self) -> bool {
        !self.tracing && self.sink.is_none()
    }

    /// Log a message emitted at recursion `depth`.
    ///
    /// The message is indented by two spaces per level so nested resolutions
    /// read as a tree in plain-text output.
    pub fn log(&self, level: LogLevel, depth: usize, message: &str) {
        if self.is_disabled() || !self.level_filter.should_log(level) {
            return;
        }

        let indented = format!("{:width$}{}", "", message, width = depth * 2);

        if self.tracing {
            let name = self.name.as_deref().unwrap_or("layered_config");
            match log_level_to_tracing(level) {
                Level::ERROR => tracing::error!(logger = %name, depth, "{}", indented),
                Level::WARN => tracing::warn!(logger = %name, depth, "{}", indented),
                Level::INFO => tracing::info!(logger = %name, depth, "{}", indented),
                Level::DEBUG => tracing::debug!(logger = %name, depth, "{}", indented),
                Level::TRACE => tracing::trace!(logger = %name, depth, "{}", indented),
            }
        }

        if let Some(ref sink) = self.sink {
            sink.record(&LogRecord {
                level,
                depth,
                message: indented,
            });
        }
    }

    pub fn trace(&self, depth: usize, msg: &str) {
        self.log(LogLevel::Trace, depth, msg);
    }

    pub fn debug(&self, depth: usize, msg: &str) {
        self.log(LogLevel::Debug, depth, msg);
    }

    pub fn info(&self, depth: usize, msg: &str) {
        self.log(LogLevel::Info, depth, msg);
    }

    pub fn warn(&self, depth: usize, msg: &str) {
        self.log(LogLevel::Warn, depth, msg);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("tracing", &self.tracing)
            .field("sink", &self.sink.is_some())
            .field("level", &self.level_filter.get())
            .field("name", &self.name)
            .finish()
    }
}

/// A sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: std::sync::Mutex<Vec<LogRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records received so far.
    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for CollectingSink {
    fn record(&self, record: &LogRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}
