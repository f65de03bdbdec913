//! Crate-wide error type.
//!
//! `PipelineError` carries a stable string code, a human-readable message, and
//! an optional boxed cause.
//! The code set stays open (new transport-facing codes can be added without a
//! breaking enum change) while still giving callers something to match on via
//! [`PipelineError::code`].

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// The fixed table of codes this crate is allowed to report.
///
/// Kept as plain `&'static str` constants (rather than an enum) so downstream
/// crates can extend the *display* surface (e.g. attach additional transport
/// codes) without this crate needing to know about them up front.
pub mod codes {
    pub const IO_ON_CLOSED_CHANNEL: &str = "io_on_closed_channel";
    pub const ALREADY_CLOSED: &str = "already_closed";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE_NAME: &str = "duplicate_name";
    pub const UNREMOVABLE_HANDLER: &str = "unremovable_handler";
    pub const WRONG_TYPE: &str = "wrong_type";
    pub const PROGRAMMER_ERROR: &str = "programmer_error";
    pub const TRANSPORT_IO: &str = "transport_io";
    pub const TRANSPORT_TIMEOUT: &str = "transport_timeout";
}

/// The single error type returned across the public surface of this crate.
pub struct PipelineError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl PipelineError {
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_programmer_error(&self) -> bool {
        self.code == codes::PROGRAMMER_ERROR
    }

    // Constructors for the fixed codes in 4.7, one per kind used throughout
    // the pipeline. Keeping them as associated functions instead of a single
    // `From<&str>` path makes call sites self-documenting.

    pub fn io_on_closed_channel(context: impl fmt::Display) -> Self {
        Self::new(
            codes::IO_ON_CLOSED_CHANNEL,
            format!("operation rejected: channel already closed ({context})"),
        )
    }

    pub fn already_closed() -> Self {
        Self::new(codes::ALREADY_CLOSED, "channel already finished")
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(codes::NOT_FOUND, format!("not found: {what}"))
    }

    pub fn duplicate_name(name: impl fmt::Display) -> Self {
        Self::new(codes::DUPLICATE_NAME, format!("duplicate handler name: {name}"))
    }

    pub fn unremovable_handler(name: impl fmt::Display) -> Self {
        Self::new(
            codes::UNREMOVABLE_HANDLER,
            format!("handler '{name}' does not declare the removable capability"),
        )
    }

    pub fn wrong_type(expected: &'static str, found: &'static str) -> Self {
        Self::new(
            codes::WRONG_TYPE,
            format!("envelope type mismatch: expected {expected}, found {found}"),
        )
    }

    pub fn programmer_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::PROGRAMMER_ERROR, message)
    }

    pub fn transport_io(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::TRANSPORT_IO, message)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Raises a programmer error: always emits a structured `tracing::error!`
/// record (every programmer-error path is observable regardless of build
/// profile or which `Logger` a pipeline happens to be wired to), then in
/// debug builds panics immediately (the invariant is considered
/// unconditionally violated), in release builds degrades to returning the
/// error value so the caller's normal error path can still report it.
#[macro_export]
macro_rules! programmer_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(target: "conduit_core", "programmer error: {}", message);
        debug_assert!(false, "{}", message);
        $crate::error::PipelineError::programmer_error(message)
    }};
}
