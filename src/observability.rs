//! Backend-agnostic structured logging facade.
//!
//! A small
//! object-safe trait handler authors and the pipeline itself log through,
//! decoupled from any concrete backend. [`TracingLogger`] bridges the facade
//! to the `tracing` crate; [`NoopLogger`] is the zero-configuration default.

use std::fmt;
use std::sync::Arc;

/// Log severity, mapped onto `tracing::Level` by [`TracingLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured log record.
pub struct LogRecord<'a> {
    pub severity: Severity,
    pub message: &'a str,
    pub target: &'a str,
    pub handler_name: Option<&'a str>,
}

impl<'a> LogRecord<'a> {
    pub fn new(severity: Severity, target: &'a str, message: &'a str) -> Self {
        Self {
            severity,
            message,
            target,
            handler_name: None,
        }
    }

    pub fn with_handler(mut self, name: &'a str) -> Self {
        self.handler_name = Some(name);
        self
    }
}

/// Object-safe logging facade. Implementations must be cheap to call on the
/// hot dispatch path.
pub trait Logger: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);
}

impl fmt::Debug for dyn Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Logger")
    }
}

/// Discards every record. The pipeline's default logger, so the crate is
/// usable with zero global logging setup.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _record: &LogRecord<'_>) {}
}

/// Bridges the facade to the `tracing` crate.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        match record.severity {
            Severity::Trace => tracing::trace!(
                target: "conduit_core",
                handler = record.handler_name.unwrap_or(""),
                source = record.target,
                "{}", record.message
            ),
            Severity::Debug => tracing::debug!(
                target: "conduit_core",
                handler = record.handler_name.unwrap_or(""),
                source = record.target,
                "{}", record.message
            ),
            Severity::Info => tracing::info!(
                target: "conduit_core",
                handler = record.handler_name.unwrap_or(""),
                source = record.target,
                "{}", record.message
            ),
            Severity::Warn => tracing::warn!(
                target: "conduit_core",
                handler = record.handler_name.unwrap_or(""),
                source = record.target,
                "{}", record.message
            ),
            Severity::Error => tracing::error!(
                target: "conduit_core",
                handler = record.handler_name.unwrap_or(""),
                source = record.target,
                "{}", record.message
            ),
        }
    }
}

pub fn noop() -> Arc<dyn Logger> {
    Arc::new(NoopLogger)
}
