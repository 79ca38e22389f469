//! Integration tests: bytecode modules linked against host modules

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytecode_system::{
    Assembler, BinaryOp, FunctionSignature, Instruction, ModuleBuilder, RegisterLayout,
    RegisterOperand, ValueType,
};
use core_types::{ErrorKind, VmError, WaitHandle, WaitMode};
use interpreter::{BytecodeModule, Context, Module, NativeModule, RuntimeConfig, Value};
use memory_manager::{SystemAllocator, TrackingAllocator, VmRef};

fn sig(args: &[ValueType], results: &[ValueType]) -> FunctionSignature {
    FunctionSignature::new(args.to_vec(), results.to_vec())
}

fn load(builder: ModuleBuilder) -> Arc<BytecodeModule> {
    BytecodeModule::create(
        builder.build().to_bytes(),
        SystemAllocator::shared(),
        SystemAllocator::shared(),
    )
    .unwrap()
}

/// Host module handing out `handle` and doubling integers.
fn device(handle: WaitHandle) -> Arc<NativeModule> {
    NativeModule::builder("device")
        .function("fence", sig(&[], &[ValueType::Ref]), move |_: &[Value]| {
            Ok(vec![Value::from(VmRef::new(handle.clone()))])
        })
        .function(
            "double",
            sig(&[ValueType::I32], &[ValueType::I32]),
            |args: &[Value]| match args[0].as_i32() {
                Some(v) => Ok(vec![Value::I32(v.wrapping_mul(2))]),
                None => Err(VmError::invalid_argument("double expects an i32")),
            },
        )
        .build()
        .unwrap()
}

/// `app.main(x)`: waits on the device fence, then returns `device.double(x)`.
fn app() -> ModuleBuilder {
    let mut asm = Assembler::new();
    asm.emit(&Instruction::call_import(0, &[], &[RegisterOperand::reference(0)]));
    asm.emit(&Instruction::await_handles(WaitMode::All, &[0]));
    asm.emit(&Instruction::call_import(
        1,
        &[RegisterOperand::i32(0)],
        &[RegisterOperand::i32(1)],
    ));
    asm.emit(&Instruction::ret(&[RegisterOperand::i32(1)]));

    let mut builder = ModuleBuilder::new("app");
    builder.add_import("device.fence", sig(&[], &[ValueType::Ref]));
    builder.add_import("device.double", sig(&[ValueType::I32], &[ValueType::I32]));
    let main = builder.add_function(
        "main",
        sig(&[ValueType::I32], &[ValueType::I32]),
        &asm.finish().unwrap(),
        RegisterLayout::new(2, 1),
    );
    builder.add_export("main", main);
    builder
}

#[test]
fn test_invoke_waits_for_host_signal() {
    let fence = WaitHandle::new();
    let mut context = Context::new(RuntimeConfig::default());
    context.register_module(device(fence.clone())).unwrap();
    context.register_module(load(app())).unwrap();

    let signaller = {
        let fence = fence.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            fence.signal();
        })
    };
    let main = context.lookup("app.main").unwrap();
    assert_eq!(context.invoke(&main, vec![Value::I32(21)]).unwrap(), vec![Value::I32(42)]);
    signaller.join().unwrap();
}

#[test]
fn test_invoke_times_out() {
    let config = RuntimeConfig {
        await_timeout_ms: 10,
        ..RuntimeConfig::default()
    };
    let mut context = Context::new(config);
    context.register_module(device(WaitHandle::new())).unwrap();
    context.register_module(load(app())).unwrap();

    let main = context.lookup("app.main").unwrap();
    let err = context.invoke(&main, vec![Value::I32(1)]).unwrap_err();
    assert!(err.is(ErrorKind::DeadlineExceeded));
}

#[test]
fn test_native_argument_mismatch_is_rejected() {
    let mut context = Context::new(RuntimeConfig::default());
    context.register_module(device(WaitHandle::signaled())).unwrap();
    let double = context.lookup("device.double").unwrap();
    let err = context.invoke(&double, vec![Value::null()]).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[test]
fn test_missing_import_module_is_not_found() {
    let mut context = Context::new(RuntimeConfig::default());
    let err = context.register_module(load(app())).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert!(context.modules().is_empty());
}

#[test]
fn test_missing_export_is_not_found() {
    let mut context = Context::new(RuntimeConfig::default());
    let partial = NativeModule::builder("device")
        .function("fence", sig(&[], &[ValueType::Ref]), |_: &[Value]| {
            Ok(vec![Value::from(VmRef::new(WaitHandle::signaled()))])
        })
        .build()
        .unwrap();
    context.register_module(partial).unwrap();
    let err = context.register_module(load(app())).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn test_import_signature_mismatch_is_rejected() {
    let mut context = Context::new(RuntimeConfig::default());
    let wrong = NativeModule::builder("device")
        .function("fence", sig(&[], &[ValueType::I32]), |_: &[Value]| Ok(vec![Value::I32(0)]))
        .function("double", sig(&[ValueType::I32], &[ValueType::I32]), |args: &[Value]| {
            Ok(args.to_vec())
        })
        .build()
        .unwrap();
    context.register_module(wrong).unwrap();
    let err = context.register_module(load(app())).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
    assert_eq!(context.modules().len(), 1);
}

#[test]
fn test_unqualified_import_name_is_rejected() {
    let mut builder = app();
    builder.add_import("orphan", sig(&[], &[]));
    let mut context = Context::new(RuntimeConfig::default());
    context.register_module(device(WaitHandle::new())).unwrap();
    let err = context.register_module(load(builder)).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArgument));
}

#[test]
fn test_context_drop_releases_everything() {
    let states = Arc::new(TrackingAllocator::new());
    let buffers = Arc::new(TrackingAllocator::new());
    let fence = WaitHandle::signaled();
    {
        let mut context = Context::with_allocator(RuntimeConfig::default(), states.clone());
        context.register_module(device(fence.clone())).unwrap();
        let module =
            BytecodeModule::create(app().build().to_bytes(), buffers.clone(), buffers.clone()).unwrap();
        context.register_module(module).unwrap();

        let main = context.lookup("app.main").unwrap();
        assert_eq!(context.invoke(&main, vec![Value::I32(4)]).unwrap(), vec![Value::I32(8)]);
        assert!(states.live_bytes() > 0);
    }
    assert!(states.is_balanced());
    assert!(buffers.is_balanced());
}

#[test]
fn test_bytecode_to_bytecode_chain() {
    let mut lib = ModuleBuilder::new("lib");
    let mut asm = Assembler::new();
    asm.emit(&Instruction::Binary { op: BinaryOp::Sub, lhs: 0, rhs: 1, dst: 0 });
    asm.emit(&Instruction::ret(&[RegisterOperand::i32(0)]));
    let sub = lib.add_function(
        "sub",
        sig(&[ValueType::I32, ValueType::I32], &[ValueType::I32]),
        &asm.finish().unwrap(),
        RegisterLayout::new(2, 0),
    );
    lib.add_export("sub", sub);

    let mut user = ModuleBuilder::new("user");
    user.add_import("lib.sub", sig(&[ValueType::I32, ValueType::I32], &[ValueType::I32]));
    let mut asm = Assembler::new();
    asm.emit(&Instruction::ConstI32 { value: 100, dst: 1 });
    asm.emit(&Instruction::call_import(
        0,
        &[RegisterOperand::i32(1), RegisterOperand::i32(0)],
        &[RegisterOperand::i32(0)],
    ));
    asm.emit(&Instruction::ret(&[RegisterOperand::i32(0)]));
    let main = user.add_function(
        "main",
        sig(&[ValueType::I32], &[ValueType::I32]),
        &asm.finish().unwrap(),
        RegisterLayout::new(2, 0),
    );
    user.add_export("main", main);

    let mut context = Context::new(RuntimeConfig::default());
    context.register_module(load(lib)).unwrap();
    context.register_module(load(user)).unwrap();
    let main = context.lookup("user.main").unwrap();
    assert_eq!(context.invoke(&main, vec![Value::I32(58)]).unwrap(), vec![Value::I32(42)]);
    assert_eq!(
        context.module("lib").map(|m| m.signature().export_function_count),
        Some(1)
    );
}
