//! Tests for loading bytecode modules and the module interface

use std::sync::Arc;

use bytecode_system::{Instruction, ModuleBuilder, RegisterLayout};
use core_types::ErrorKind;
use interpreter::{BytecodeModule, Linkage, Module, StateResolver, StateTable};
use memory_manager::{Allocator, ConstBuffer, TrackingAllocator};

use crate::common::*;

fn two_function_builder() -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("pair");
    builder.add_function(
        "helper",
        sig(&[I], &[I]),
        &code(|a| {
            a.emit(&Instruction::ret(&[i(0)]));
        }),
        RegisterLayout::new(1, 0),
    );
    let main = builder.add_function(
        "main",
        sig(&[], &[]),
        &code(|a| {
            a.emit(&Instruction::ret(&[]));
        }),
        RegisterLayout::default(),
    );
    builder.add_export("run", main);
    builder.add_import("host.tick", sig(&[], &[]));
    builder.add_rodata("greeting", b"hello".to_vec());
    builder.set_module_state(16, 2);
    builder
}

#[test]
fn test_signature_counts() {
    let module = load(two_function_builder().build());
    let signature = module.signature();
    assert_eq!(signature.import_function_count, 1);
    assert_eq!(signature.export_function_count, 1);
    assert_eq!(signature.internal_function_count, 2);
    assert_eq!(module.name(), "pair");
}

#[test]
fn test_export_is_rewritten_to_internal() {
    let module = load(two_function_builder().build());
    let info = module.get_function(Linkage::Export, 0).unwrap();
    assert_eq!(info.function.linkage, Linkage::Internal);
    assert_eq!(info.function.ordinal, 1);
    assert_eq!(info.name, "run");

    let found = module.lookup_function(Linkage::Export, "run").unwrap();
    assert_eq!(found, info.function);
    assert_eq!(found, module.get_function(Linkage::Internal, 1).unwrap().function);
}

#[test]
fn test_lookup_by_linkage() {
    let module = load(two_function_builder().build());
    let helper = module.lookup_function(Linkage::Internal, "helper").unwrap();
    assert_eq!(helper.ordinal, 0);

    let import = module.lookup_function(Linkage::Import, "host.tick").unwrap();
    assert_eq!(import.linkage, Linkage::Import);
    assert!(import.to_internal().unwrap_err().is(ErrorKind::InvalidArgument));

    assert!(module
        .lookup_function(Linkage::Export, "helper")
        .unwrap_err()
        .is(ErrorKind::NotFound));
    assert!(module
        .lookup_function(Linkage::Internal, "")
        .unwrap_err()
        .is(ErrorKind::NotFound));
}

#[test]
fn test_get_function_out_of_range() {
    let module = load(two_function_builder().build());
    for (linkage, ordinal) in [(Linkage::Import, 1), (Linkage::Export, 1), (Linkage::Internal, 2)] {
        let err = module.get_function(linkage, ordinal).unwrap_err();
        assert!(err.is(ErrorKind::InvalidArgument), "{:?}", linkage);
    }
}

#[test]
fn test_get_function_reports_signature() {
    let module = load(two_function_builder().build());
    let info = module.get_function(Linkage::Internal, 0).unwrap();
    assert_eq!(info.signature.argument_count(), 1);
    assert_eq!(info.signature.result_count(), 1);
    let import = module.get_function(Linkage::Import, 0).unwrap();
    assert_eq!(import.name, "host.tick");
}

#[test]
fn test_create_rejects_zero_descriptors() {
    let mut def = two_function_builder().build();
    def.function_descriptors = Some(Vec::new());
    let buffers = Arc::new(TrackingAllocator::new());
    let modules = Arc::new(TrackingAllocator::new());

    let err = BytecodeModule::create(def.to_bytes(), buffers.clone(), modules.clone()).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
    assert_eq!(buffers.stats().allocations, 0);
    assert_eq!(modules.stats().allocations, 0);
}

#[test]
fn test_create_rejects_garbage() {
    let buffers = Arc::new(TrackingAllocator::new());
    let modules = Arc::new(TrackingAllocator::new());
    let err = BytecodeModule::create(vec![0u8; 40], buffers.clone(), modules.clone()).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
    assert!(buffers.is_balanced());
    assert!(modules.is_balanced());
}

#[test]
fn test_drop_returns_memory() {
    let bytes = two_function_builder().build().to_bytes();
    let buffers = Arc::new(TrackingAllocator::new());
    let modules = Arc::new(TrackingAllocator::new());

    let module = BytecodeModule::create(bytes.clone(), buffers.clone(), modules.clone()).unwrap();
    assert_eq!(buffers.live_bytes(), bytes.len());
    assert!(modules.live_bytes() > 0);

    drop(module);
    assert!(buffers.is_balanced());
    assert!(modules.is_balanced());
}

#[test]
fn test_create_propagates_allocator_refusal() {
    let bytes = two_function_builder().build().to_bytes();
    let buffers = Arc::new(TrackingAllocator::with_limit(bytes.len() - 1));
    let modules = Arc::new(TrackingAllocator::new());
    let err = BytecodeModule::create(bytes, buffers.clone(), modules.clone()).unwrap_err();
    assert!(err.is(ErrorKind::ResourceExhausted));
    assert!(modules.is_balanced());
}

#[test]
fn test_alloc_state_regions() {
    let module = load(two_function_builder().build());
    let allocator = Arc::new(TrackingAllocator::new());
    let mut state = module.alloc_state(allocator.clone()).unwrap();
    assert_eq!(state.owner(), module.id());
    assert_eq!(state.import_count(), 1);
    assert!(allocator.live_bytes() >= 16);

    state.store_i32(12, 7).unwrap();
    assert_eq!(state.load_i32(12).unwrap(), 7);
    assert!(state.global_ref(1).unwrap().is_none());
    assert!(state.global_ref(2).is_err());

    let rodata = state.rodata_ref(0).unwrap();
    let buffer = rodata.downcast_ref::<ConstBuffer>().unwrap();
    assert_eq!(buffer.name(), "greeting");
    assert_eq!(buffer.as_bytes(), b"hello");

    module.free_state(&mut state).unwrap();
    assert!(allocator.is_balanced());
}

#[test]
fn test_free_state_twice_is_rejected() {
    let module = load(two_function_builder().build());
    let mut state = module.alloc_state(system()).unwrap();
    module.free_state(&mut state).unwrap();
    let err = module.free_state(&mut state).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[test]
fn test_free_state_of_other_module_is_rejected() {
    let first = load(two_function_builder().build());
    let second = load(two_function_builder().build());
    let mut state = first.alloc_state(system()).unwrap();
    assert!(second
        .free_state(&mut state)
        .unwrap_err()
        .is(ErrorKind::InvalidArgument));
    assert!(!state.is_freed());
}

#[test]
fn test_resolve_import_bounds() {
    let module = load(two_function_builder().build());
    let target = module.get_function(Linkage::Export, 0).unwrap().function;
    let mut state = module.alloc_state(system()).unwrap();

    module.resolve_import(&mut state, 0, target.clone()).unwrap();
    assert_eq!(state.import(0).unwrap(), target);

    let err = module.resolve_import(&mut state, 1, target).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[test]
fn test_register_layout_requires_internal_linkage() {
    let module = load(two_function_builder().build());
    let helper = module.lookup_function(Linkage::Internal, "helper").unwrap();
    assert_eq!(module.register_layout(&helper).unwrap(), RegisterLayout::new(1, 0));

    let import = module.get_function(Linkage::Import, 0).unwrap().function;
    assert!(module
        .register_layout(&import)
        .unwrap_err()
        .is(ErrorKind::InvalidArgument));

    let other = load(two_function_builder().build());
    let foreign = other.lookup_function(Linkage::Internal, "helper").unwrap();
    assert!(module.register_layout(&foreign).is_err());
}

#[test]
fn test_state_table_resolves_by_module() {
    let module = load(two_function_builder().build());
    let table = StateTable::new();
    assert!(table.is_empty());
    let state = table.insert(module.id(), module.alloc_state(system()).unwrap());
    state.lock().store_i32(0, 3).unwrap();

    let resolved = table.state_for(module.id()).unwrap();
    assert_eq!(resolved.lock().load_i32(0).unwrap(), 3);
    assert_eq!(table.len(), 1);
    assert!(table.remove(module.id()).is_some());
    assert!(table.state_for(module.id()).is_none());
}

#[test]
fn test_from_def_verifies() {
    let mut def = two_function_builder().build();
    def.name.clear();
    let allocator: Arc<dyn Allocator> = Arc::new(TrackingAllocator::new());
    assert!(BytecodeModule::from_def(def, allocator).is_err());
}

#[test]
fn test_lookup_then_get_agrees_in_every_table() {
    let mut builder = ModuleBuilder::new("tables");
    builder.add_import("host.tick", sig(&[], &[]));
    builder.add_import("host.load", sig(&[I], &[R]));
    let mut internal = Vec::new();
    for (name, signature) in [
        ("first", sig(&[I], &[I])),
        ("second", sig(&[R], &[])),
        ("third", sig(&[I, I], &[I, R])),
    ] {
        internal.push(builder.add_function(
            name,
            signature,
            &code(|a| {
                a.emit(&Instruction::Yield);
            }),
            RegisterLayout::new(2, 2),
        ));
    }
    builder.add_export("alpha", internal[2]);
    builder.add_export("beta", internal[0]);
    let module = load(builder.build());
    let counts = module.signature();

    for (linkage, count) in [
        (Linkage::Import, counts.import_function_count),
        (Linkage::Export, counts.export_function_count),
        (Linkage::Internal, counts.internal_function_count),
    ] {
        for ordinal in 0..count {
            let listed = module.get_function(linkage, ordinal).unwrap();
            let found = module.lookup_function(linkage, &listed.name).unwrap();
            assert_eq!(found, listed.function, "{} {}", linkage, ordinal);

            let resolved = module.get_function(found.linkage, found.ordinal).unwrap();
            assert_eq!(resolved.signature, listed.signature, "{} {}", linkage, ordinal);
            if linkage == Linkage::Export {
                assert_eq!(found.linkage, Linkage::Internal);
            } else {
                assert_eq!(resolved.name, listed.name);
            }
        }
    }
}

#[test]
fn test_single_export_module_loads() {
    let def = single("scenario", sig(&[], &[]), RegisterLayout::new(2, 0), |a| {
        a.emit(&Instruction::Yield);
        a.emit(&Instruction::Yield);
        a.emit(&Instruction::ret(&[]));
    })
    .build();
    let descriptor = def.descriptor(0).unwrap();
    assert_eq!(descriptor.bytecode_offset, 0);
    assert_eq!(descriptor.bytecode_length, 4);
    assert!(def.imported_functions.is_empty());

    let module = load(def);
    let main = module.lookup_function(Linkage::Export, "main").unwrap();
    assert_eq!(main.linkage, Linkage::Internal);
    assert_eq!(main.ordinal, 0);
    assert_eq!(module.register_layout(&main).unwrap(), RegisterLayout::new(2, 0));

    let export = module.get_function(Linkage::Export, 0).unwrap();
    let internal = module.get_function(Linkage::Internal, 0).unwrap();
    assert_eq!(internal.signature, export.signature);
    assert_eq!(internal.function, main);
}
