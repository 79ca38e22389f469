//! Core types shared by every runtime component.
//!
//! This crate provides the foundational types for the virtual machine:
//! the error taxonomy, shared byte spans and wait handles.
//!
//! # Overview
//!
//! - [`VmError`] - Errors with a kind, message and captured call stack
//! - [`ErrorKind`] - Classes of failure
//! - [`ByteSpan`] - Zero-copy window into a shared byte buffer
//! - [`WaitHandle`] / [`WaitSet`] - Conditions an awaiting frame waits on
//!
//! # Examples
//!
//! ```
//! use core_types::{ByteSpan, ErrorKind, VmError};
//!
//! let span = ByteSpan::from(vec![1u8, 2, 3]);
//! assert_eq!(span.len(), 3);
//!
//! let error = VmError::not_found("function 'main'");
//! assert_eq!(error.kind, ErrorKind::NotFound);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod span;
mod wait;

pub use error::{ErrorKind, VmError, VmResult};
pub use span::ByteSpan;
pub use wait::{WaitHandle, WaitMode, WaitSet};
