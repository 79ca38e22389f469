//! Contract tests for the memory_manager public API.
//! These tests ensure all exported types and functions exist with correct signatures.

use std::sync::Arc;
use std::thread;

use core_types::{ByteSpan, ErrorKind};
use memory_manager::{
    assign_ref, Allocator, ConstBuffer, CountingObserver, SystemAllocator, TrackingAllocator,
    VmRef,
};

/// Allocator contract: usable as a shared trait object
#[test]
fn contract_allocator_trait_object() {
    let allocators: Vec<Arc<dyn Allocator>> = vec![
        SystemAllocator::shared(),
        Arc::new(TrackingAllocator::new()),
    ];
    for allocator in allocators {
        allocator.allocate(128).unwrap();
        allocator.deallocate(128);
    }
}

/// TrackingAllocator contract: refusal is ResourceExhausted and leaves no reservation
#[test]
fn contract_tracking_allocator_refusal() {
    let allocator = TrackingAllocator::with_limit(16);
    allocator.allocate(16).unwrap();
    let err = allocator.allocate(1).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    assert_eq!(allocator.live_bytes(), 16);
    allocator.deallocate(16);
    assert!(allocator.is_balanced());
}

/// TrackingAllocator contract: concurrent use keeps counts exact
#[test]
fn contract_tracking_allocator_is_thread_safe() {
    let allocator = Arc::new(TrackingAllocator::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                for _ in 0..100 {
                    allocator.allocate(8).unwrap();
                    allocator.deallocate(8);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let stats = allocator.stats();
    assert_eq!(stats.allocations, 400);
    assert_eq!(stats.deallocations, 400);
    assert!(allocator.is_balanced());
}

/// VmRef contract: handles cross threads and stay balanced
#[test]
fn contract_vm_ref_send_sync() {
    let observer = CountingObserver::new();
    let shared = VmRef::with_observer(ConstBuffer::new("c", ByteSpan::from(vec![5u8])), observer.clone());

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let local = shared.clone();
            thread::spawn(move || {
                let buffer = local.downcast_ref::<ConstBuffer>().unwrap();
                buffer.as_bytes()[0]
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 5);
    }

    drop(shared);
    assert!(observer.is_balanced());
    assert_eq!(observer.retains(), 4);
}

/// assign_ref contract: acquire on store, release on overwrite and clear
#[test]
fn contract_assign_ref_pairs_acquire_and_release() {
    let observer = CountingObserver::new();
    let mut slots: Vec<Option<VmRef>> = vec![None; 4];
    {
        let object = VmRef::with_observer(0u64, observer.clone());
        for slot in slots.iter_mut() {
            assign_ref(slot, Some(&object));
        }
        assert_eq!(object.ref_count(), 5);
    }
    assert_eq!(observer.outstanding(), 4);

    for slot in slots.iter_mut() {
        assign_ref(slot, None);
    }
    assert!(observer.is_balanced());
}
