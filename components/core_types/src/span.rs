//! Shared, immutable byte ranges.
//!
//! A [`ByteSpan`] is a window into a reference-counted byte buffer. Module
//! loading hands out spans into the loaded buffer so the bytecode blob and
//! read-only data segments are never copied.

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::Arc;

/// An immutable window into a shared byte buffer.
#[derive(Clone)]
pub struct ByteSpan {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl ByteSpan {
    /// Wrap an entire buffer.
    pub fn new(data: Arc<[u8]>) -> Self {
        let end = data.len();
        Self {
            data,
            start: 0,
            end,
        }
    }

    /// Create an empty span.
    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()))
    }

    /// Create a span over `range` of `data`.
    ///
    /// Returns `None` if the range does not lie within the buffer.
    pub fn from_range(data: Arc<[u8]>, range: Range<usize>) -> Option<Self> {
        if range.start > range.end || range.end > data.len() {
            return None;
        }
        Some(Self {
            data,
            start: range.start,
            end: range.end,
        })
    }

    /// Narrow this span to a sub-range relative to its own start.
    ///
    /// Returns `None` if the range does not lie within this span.
    pub fn slice(&self, range: Range<usize>) -> Option<Self> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        Some(Self {
            data: Arc::clone(&self.data),
            start: self.start + range.start,
            end: self.start + range.end,
        })
    }

    /// Number of bytes in the span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the span has no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// View the bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

impl Deref for ByteSpan {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteSpan {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Arc::from(bytes))
    }
}

impl From<&[u8]> for ByteSpan {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes))
    }
}

impl PartialEq for ByteSpan {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteSpan {}

impl fmt::Debug for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSpan")
            .field("start", &self.start)
            .field("len", &self.len())
            .finish()
    }
}
