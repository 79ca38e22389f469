//! Virtual machine error types.
//!
//! Every fallible operation in the runtime returns a [`VmError`] whose
//! [`ErrorKind`] tells the caller which class of failure occurred. Verification
//! failures are always [`ErrorKind::InvalidArgument`]; runtime invariant
//! violations surfaced while dispatching bytecode are [`ErrorKind::Fault`].

use std::fmt;

use thiserror::Error;

/// The kind of virtual machine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-contract input (bad buffer, ordinal, linkage or state)
    InvalidArgument,
    /// A lookup by name found nothing
    NotFound,
    /// Runtime invariant violation raised while executing bytecode
    Fault,
    /// An allocator refused to provide memory
    ResourceExhausted,
    /// A host-side wait ran out of time
    DeadlineExceeded,
}

impl ErrorKind {
    /// Short lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::Fault => "fault",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual machine error with message and, for faults, the call stack.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, VmError};
///
/// let error = VmError::invalid_argument("module name is empty");
/// assert_eq!(error.kind, ErrorKind::InvalidArgument);
/// assert_eq!(error.to_string(), "invalid argument: module name is empty");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct VmError {
    /// The class of failure
    pub kind: ErrorKind,
    /// Human-readable description naming the violated invariant
    pub message: String,
    /// Short frame descriptions, innermost first, captured at the failure site
    pub stack: Vec<String>,
}

/// Result alias used throughout the runtime.
pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Create an [`ErrorKind::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create an [`ErrorKind::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create an [`ErrorKind::Fault`] error.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fault, message)
    }

    /// Create an [`ErrorKind::ResourceExhausted`] error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    /// Create an [`ErrorKind::DeadlineExceeded`] error.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    /// Attach a captured call stack.
    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    /// Returns true if this error is of the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}
