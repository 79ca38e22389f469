//! Builders shared by the unit tests

#![allow(dead_code)]

use std::sync::Arc;

use bytecode_system::{
    Assembler, FunctionSignature, ModuleBuilder, ModuleDef, RegisterLayout, RegisterOperand,
    ValueType,
};
use interpreter::{BytecodeModule, Module, RuntimeConfig, Stack, StateTable};
use memory_manager::{Allocator, SystemAllocator};

pub const I: ValueType = ValueType::I32;
pub const R: ValueType = ValueType::Ref;

pub fn sig(args: &[ValueType], results: &[ValueType]) -> FunctionSignature {
    FunctionSignature::new(args.to_vec(), results.to_vec())
}

pub fn i(index: u16) -> RegisterOperand {
    RegisterOperand::i32(index)
}

pub fn r(index: u16) -> RegisterOperand {
    RegisterOperand::reference(index)
}

pub fn system() -> Arc<dyn Allocator> {
    SystemAllocator::shared()
}

/// Assemble a function body.
pub fn code(build: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut asm = Assembler::new();
    build(&mut asm);
    asm.finish().unwrap()
}

/// A module with one exported function `main`.
pub fn single(
    name: &str,
    signature: FunctionSignature,
    layout: RegisterLayout,
    build: impl FnOnce(&mut Assembler),
) -> ModuleBuilder {
    let mut builder = ModuleBuilder::new(name);
    let main = builder.add_function("main", signature, &code(build), layout);
    builder.add_export("main", main);
    builder
}

pub fn load(def: ModuleDef) -> Arc<BytecodeModule> {
    BytecodeModule::create(def.to_bytes(), system(), system()).unwrap()
}

/// A stack with states allocated for `modules`, no imports resolved.
pub fn bare_stack(modules: &[&dyn Module], config: &RuntimeConfig) -> (Arc<StateTable>, Stack) {
    let table = Arc::new(StateTable::new());
    for module in modules {
        table.insert(module.id(), module.alloc_state(system()).unwrap());
    }
    let stack = Stack::new(table.clone(), config);
    (table, stack)
}
