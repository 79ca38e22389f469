//! Memory Manager - allocator accounting and reference-counted objects
//!
//! This component provides:
//! - The [`Allocator`] contract used when creating modules and module states
//! - [`TrackingAllocator`], a counting allocator with an optional byte limit
//! - [`VmRef`], the counted handle stored in reference registers and globals
//! - [`CountingObserver`], a test double that balances acquires and releases
//! - [`ConstBuffer`], the object behind rodata references

pub mod allocator;
pub mod const_buffer;
pub mod vm_ref;

// Re-export main types
pub use allocator::{Allocator, AllocatorStats, SystemAllocator, TrackingAllocator};
pub use const_buffer::ConstBuffer;
pub use vm_ref::{assign_ref, CountingObserver, RefObserver, VmRef};
