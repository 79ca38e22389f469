//! Contract tests for bytecode_system
//! Verifies the public API used by the interpreter and hosts

use std::sync::Arc;

use bytecode_system::{
    verify, Assembler, FunctionSignature, Instruction, ModuleBuilder, ModuleDef, RegisterLayout,
    RegisterOperand, ValueType, I32_REGISTER_COUNT, REF_REGISTER_COUNT,
};
use core_types::ErrorKind;

/// Test ModuleDef::from_bytes contract: shares the input buffer
#[test]
fn test_from_bytes_takes_shared_buffer() {
    let mut asm = Assembler::new();
    asm.emit(&Instruction::ret(&[]));
    let mut builder = ModuleBuilder::new("contract");
    let f = builder.add_function("f", FunctionSignature::default(), &asm.finish().unwrap(), RegisterLayout::default());
    builder.add_export("f", f);

    let buffer: Arc<[u8]> = Arc::from(builder.build().to_bytes());
    let def = ModuleDef::from_bytes(Arc::clone(&buffer)).unwrap();
    assert!(Arc::strong_count(&buffer) > 1);
    drop(def);
    assert_eq!(Arc::strong_count(&buffer), 1);
}

/// Test verify contract: every failure is InvalidArgument
#[test]
fn test_verify_failures_are_invalid_argument() {
    let err = verify(&ModuleDef::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

/// Test register limit constants match the machine register files
#[test]
fn test_register_limits_contract() {
    assert_eq!(I32_REGISTER_COUNT, 128);
    assert_eq!(REF_REGISTER_COUNT, 64);
    assert!(RegisterLayout::new(128, 64).fits_machine());
}

/// Test FunctionSignature contract: counts follow the type lists
#[test]
fn test_signature_counts() {
    let sig = FunctionSignature::new(vec![ValueType::I32, ValueType::Ref], vec![ValueType::Ref]);
    assert_eq!(sig.argument_count(), 2);
    assert_eq!(sig.result_count(), 1);
    assert_eq!(sig.argument_layout(), RegisterLayout::new(1, 1));
}

/// Test RegisterOperand contract: ref flag survives encoding
#[test]
fn test_register_operand_classes() {
    let inst = Instruction::call(0, &[RegisterOperand::reference(63)], &[RegisterOperand::i32(127)]);
    let mut code = Vec::new();
    inst.encode(&mut code);
    assert_eq!(Instruction::decode(&code, 0).unwrap().0, inst);
}
