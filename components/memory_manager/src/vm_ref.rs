//! Reference-counted objects visible to bytecode.
//!
//! A [`VmRef`] is a counted handle: cloning it acquires a reference and
//! dropping it releases one. Storing a handle into a register or global slot
//! clones it (acquire-on-store) and overwriting or clearing the slot drops
//! the previous handle (release-on-overwrite), so acquire/release pairing
//! follows from ownership rather than from manual bookkeeping.
//!
//! An optional [`RefObserver`] sees every acquire and release of an object,
//! which lets tests prove that teardown leaves nothing retained.

use std::any::{self, Any};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Observes acquire/release events of counted handles.
pub trait RefObserver: Send + Sync + fmt::Debug {
    /// A reference to an object of `type_name` was acquired.
    fn retained(&self, type_name: &'static str);

    /// A reference to an object of `type_name` was released.
    fn released(&self, type_name: &'static str);
}

struct RefInner {
    type_name: &'static str,
    object: Box<dyn Any + Send + Sync>,
    observer: Option<Arc<dyn RefObserver>>,
}

/// A counted handle to a type-erased, thread-safe object.
///
/// # Examples
///
/// ```
/// use memory_manager::VmRef;
///
/// let buffer = VmRef::new(vec![1u8, 2, 3]);
/// let alias = buffer.clone();
/// assert_eq!(buffer.ref_count(), 2);
/// assert_eq!(alias.downcast_ref::<Vec<u8>>().map(|v| v.len()), Some(3));
/// drop(alias);
/// assert_eq!(buffer.ref_count(), 1);
/// ```
pub struct VmRef {
    inner: Arc<RefInner>,
}

impl VmRef {
    /// Wrap `object` in a new handle holding one reference.
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self {
            inner: Arc::new(RefInner {
                type_name: any::type_name::<T>(),
                object: Box::new(object),
                observer: None,
            }),
        }
    }

    /// Wrap `object` and report every acquire/release to `observer`.
    ///
    /// The initial reference counts as one acquire.
    pub fn with_observer<T: Any + Send + Sync>(object: T, observer: Arc<dyn RefObserver>) -> Self {
        let type_name = any::type_name::<T>();
        observer.retained(type_name);
        Self {
            inner: Arc::new(RefInner {
                type_name,
                object: Box::new(object),
                observer: Some(observer),
            }),
        }
    }

    /// Name of the wrapped object's type.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    /// Returns true if the wrapped object is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.object.is::<T>()
    }

    /// Borrow the wrapped object as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.object.downcast_ref::<T>()
    }

    /// Number of live handles to the object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns true if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &VmRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for VmRef {
    fn clone(&self) -> Self {
        if let Some(observer) = &self.inner.observer {
            observer.retained(self.inner.type_name);
        }
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for VmRef {
    fn drop(&mut self) {
        if let Some(observer) = &self.inner.observer {
            observer.released(self.inner.type_name);
        }
    }
}

impl fmt::Debug for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmRef")
            .field("type", &self.inner.type_name)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Store `value` into a reference slot.
///
/// The new reference is acquired before the previous occupant is released,
/// so assigning a slot to itself never drops the object.
pub fn assign_ref(slot: &mut Option<VmRef>, value: Option<&VmRef>) {
    let acquired = value.cloned();
    *slot = acquired;
}

/// A [`RefObserver`] that counts acquires and releases.
#[derive(Debug, Default)]
pub struct CountingObserver {
    retains: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingObserver {
    /// Create a shared counter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of acquires observed.
    pub fn retains(&self) -> usize {
        self.retains.load(Ordering::Acquire)
    }

    /// Number of releases observed.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }

    /// References still outstanding (acquires minus releases).
    pub fn outstanding(&self) -> isize {
        self.retains() as isize - self.releases() as isize
    }

    /// Returns true if every acquire has been released.
    pub fn is_balanced(&self) -> bool {
        self.outstanding() == 0
    }
}

impl RefObserver for CountingObserver {
    fn retained(&self, _type_name: &'static str) {
        self.retains.fetch_add(1, Ordering::AcqRel);
    }

    fn released(&self, _type_name: &'static str) {
        self.releases.fetch_add(1, Ordering::AcqRel);
    }
}
