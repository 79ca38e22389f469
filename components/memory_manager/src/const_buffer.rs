//! Read-only constant buffers backing rodata segments.

use core_types::ByteSpan;

/// A named read-only byte buffer exposed to bytecode through a [`VmRef`].
///
/// The bytes are a zero-copy [`ByteSpan`] into the module's loaded buffer, so
/// a constant buffer keeps that buffer alive for as long as any reference to
/// it is held.
///
/// [`VmRef`]: crate::VmRef
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstBuffer {
    name: String,
    data: ByteSpan,
}

impl ConstBuffer {
    /// Create a constant buffer.
    pub fn new(name: impl Into<String>, data: ByteSpan) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
