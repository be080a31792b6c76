//! Error types and error handling strategy for Handoff.
//!
//! This module defines the core error types used throughout the crate.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Blocking operations that lose ownership of an element on failure hand
//!   it back through a value-carrying enum
//! - Panics in user computations are isolated and captured as a payload

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The calling task was asked to stop while blocked or about to block.
    Interrupted,
    /// The deadline elapsed before the required state transition.
    TimedOut,
    /// The future was cancelled before it produced an outcome.
    Cancelled,
    /// The user computation failed or panicked; the cause is attached.
    ExecutionFailed,
    /// The executor refused the task.
    Rejected,
    /// Null-equivalent element, non-positive capacity, negative timeout.
    InvalidArgument,
    /// Pre-populated construction overflowed the capacity.
    CapacityExceeded,
}

impl ErrorKind {
    /// Short stable name, used in Display output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::ExecutionFailed => "execution failed",
            Self::Rejected => "rejected",
            Self::InvalidArgument => "invalid argument",
            Self::CapacityExceeded => "capacity exceeded",
        }
    }
}

/// The main error type for Handoff operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation of a future.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Returns true if the calling task was interrupted.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates an execution failure wrapping a captured panic.
    #[must_use]
    pub fn panicked(payload: PanicPayload) -> Self {
        Self::new(ErrorKind::ExecutionFailed).with_source(payload)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Payload from a caught panic in a user computation.
///
/// Wraps the panic value for safe transport across task boundaries; the
/// original payload is reduced to its message.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from the opaque value `std::panic::catch_unwind`
    /// returns, falling back to a fixed string for non-string payloads.
    #[must_use]
    pub fn from_unwind(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload.downcast_ref::<&'static str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "non-string panic payload".to_owned())
            },
            |s| (*s).to_owned(),
        );
        Self::new(message)
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicPayload {}

/// Error from a blocking or timed enqueue, handing the element back.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError<T> {
    /// The calling task was interrupted before space became available.
    #[error("enqueue interrupted")]
    Interrupted(T),
    /// The queue is full (non-blocking offer only).
    #[error("queue full")]
    Full(T),
    /// The deadline elapsed before space became available.
    #[error("enqueue timed out")]
    TimedOut(T),
}

impl<T> EnqueueError<T> {
    /// Recovers the element that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Interrupted(item) | Self::Full(item) | Self::TimedOut(item) => item,
        }
    }
}

/// Error from a blocking or timed dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DequeueError {
    /// The calling task was interrupted before an element arrived.
    #[error("dequeue interrupted")]
    Interrupted,
}

/// Error from a synchronous transfer, handing a producer's item back.
#[derive(Debug, thiserror::Error)]
pub enum TransferError<T> {
    /// The calling task was interrupted while waiting for a counterpart.
    #[error("transfer interrupted")]
    Interrupted(T),
    /// The deadline elapsed with no counterpart arriving.
    #[error("transfer timed out")]
    TimedOut(T),
}

impl<T> TransferError<T> {
    /// Recovers the item that was not transferred.
    pub fn into_inner(self) -> T {
        match self {
            Self::Interrupted(item) | Self::TimedOut(item) => item,
        }
    }
}

impl<T> From<EnqueueError<T>> for Error {
    fn from(e: EnqueueError<T>) -> Self {
        match e {
            EnqueueError::Interrupted(_) => Self::new(ErrorKind::Interrupted),
            EnqueueError::Full(_) => Self::new(ErrorKind::CapacityExceeded),
            EnqueueError::TimedOut(_) => Self::new(ErrorKind::TimedOut),
        }
    }
}

impl From<DequeueError> for Error {
    fn from(e: DequeueError) -> Self {
        match e {
            DequeueError::Interrupted => Self::new(ErrorKind::Interrupted),
        }
    }
}

impl<T> From<TransferError<T>> for Error {
    fn from(e: TransferError<T>) -> Self {
        match e {
            TransferError::Interrupted(_) => Self::new(ErrorKind::Interrupted),
            TransferError::TimedOut(_) => Self::new(ErrorKind::TimedOut),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for Handoff operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::Rejected);
        assert_eq!(err.to_string(), "rejected");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::TimedOut).with_context("no counterpart");
        assert_eq!(err.to_string(), "timed out: no counterpart");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::panicked(PanicPayload::new("boom"));
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "panic: boom");
    }

    #[test]
    fn enqueue_error_returns_element() {
        let err = EnqueueError::Full(41);
        assert_eq!(err.into_inner(), 41);
    }

    #[test]
    fn from_enqueue_error() {
        let interrupted: Error = EnqueueError::Interrupted(()).into();
        assert_eq!(interrupted.kind(), ErrorKind::Interrupted);

        let timed_out: Error = EnqueueError::TimedOut(()).into();
        assert_eq!(timed_out.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn from_transfer_error() {
        let err: Error = TransferError::Interrupted("item").into();
        assert!(err.is_interrupted());
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), DequeueError> = Err(DequeueError::Interrupted);
        let err = res.context("take failed").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(err.to_string(), "interrupted: take failed");
    }

    #[test]
    fn unwind_payload_string_forms() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("static panic");
        assert_eq!(PanicPayload::from_unwind(&*static_str).message(), "static panic");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned panic"));
        assert_eq!(PanicPayload::from_unwind(&*owned).message(), "owned panic");

        let opaque: Box<dyn std::any::Any + Send> = Box::new(17_u8);
        assert_eq!(
            PanicPayload::from_unwind(&*opaque).message(),
            "non-string panic payload"
        );
    }

    #[test]
    fn predicates_match_kind() {
        let cancel = Error::new(ErrorKind::Cancelled);
        assert!(cancel.is_cancelled());
        assert!(!cancel.is_timeout());

        let timeout = Error::new(ErrorKind::TimedOut);
        assert!(!timeout.is_cancelled());
        assert!(timeout.is_timeout());
    }
}
