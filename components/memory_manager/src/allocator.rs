//! Allocator contract for module and state memory.
//!
//! Memory in the runtime is owned by ordinary Rust values; an [`Allocator`]
//! accounts for it. Every byte reserved through [`Allocator::allocate`] is
//! returned with [`Allocator::deallocate`] when its owner is torn down, so a
//! tracking allocator observes balanced totals once everything is released.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use core_types::{VmError, VmResult};

/// Accounts for memory reserved by modules and module states.
///
/// Implementations must be thread-safe: modules are shared across threads and
/// may release memory from whichever thread drops them last.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Reserve `size` bytes.
    ///
    /// Fails with `ResourceExhausted` if the allocator cannot provide them.
    fn allocate(&self, size: usize) -> VmResult<()>;

    /// Return `size` bytes previously reserved with [`Allocator::allocate`].
    fn deallocate(&self, size: usize);
}

/// An allocator backed by the global heap that never refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Create a shared handle to the system allocator.
    pub fn shared() -> Arc<dyn Allocator> {
        Arc::new(SystemAllocator)
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, _size: usize) -> VmResult<()> {
        Ok(())
    }

    fn deallocate(&self, _size: usize) {}
}

/// Allocation statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    /// Bytes currently reserved
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached
    pub peak_bytes: usize,
    /// Number of successful allocations
    pub allocations: usize,
    /// Number of deallocations
    pub deallocations: usize,
    /// Number of refused allocations
    pub failures: usize,
}

/// An allocator that counts every reservation and can enforce a byte limit.
///
/// Used by hosts to bound memory per context and by tests as a double that
/// proves allocation and release are balanced.
///
/// # Examples
///
/// ```
/// use memory_manager::{Allocator, TrackingAllocator};
///
/// let allocator = TrackingAllocator::with_limit(64);
/// allocator.allocate(48).unwrap();
/// assert!(allocator.allocate(32).is_err());
/// allocator.deallocate(48);
/// assert!(allocator.is_balanced());
/// ```
#[derive(Debug, Default)]
pub struct TrackingAllocator {
    limit: Option<usize>,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    failures: AtomicUsize,
}

impl TrackingAllocator {
    /// Create an allocator without a limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that refuses to exceed `limit` live bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            peak_bytes: self.peak_bytes.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Acquire),
            deallocations: self.deallocations.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
        }
    }

    /// Bytes currently reserved.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Returns true if every allocation has been matched by a deallocation.
    pub fn is_balanced(&self) -> bool {
        let stats = self.stats();
        stats.live_bytes == 0 && stats.allocations == stats.deallocations
    }
}

impl Allocator for TrackingAllocator {
    fn allocate(&self, size: usize) -> VmResult<()> {
        let reserved = self
            .live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                let next = live.checked_add(size)?;
                match self.limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });

        match reserved {
            Ok(previous) => {
                self.allocations.fetch_add(1, Ordering::AcqRel);
                self.peak_bytes.fetch_max(previous + size, Ordering::AcqRel);
                Ok(())
            }
            Err(live) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                Err(VmError::resource_exhausted(format!(
                    "allocation of {} bytes refused ({} live, limit {:?})",
                    size, live, self.limit
                )))
            }
        }
    }

    fn deallocate(&self, size: usize) {
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
        self.deallocations.fetch_add(1, Ordering::AcqRel);
    }
}
