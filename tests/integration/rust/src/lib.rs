//! Integration test suite for the register VM
//!
//! These tests drive modules from their binary encoding through loading,
//! linking, execution and scheduling across crate boundaries.

/// Re-export components for test convenience
pub mod components {
    pub use async_runtime;
    pub use bytecode_system;
    pub use core_types;
    pub use interpreter;
    pub use memory_manager;
}

use std::sync::Arc;

use bytecode_system::{Assembler, FunctionSignature, ModuleBuilder, ValueType};
use interpreter::BytecodeModule;
use memory_manager::SystemAllocator;

/// Signature from argument and result types.
pub fn sig(args: &[ValueType], results: &[ValueType]) -> FunctionSignature {
    FunctionSignature::new(args.to_vec(), results.to_vec())
}

/// Assemble a function body.
pub fn code(build: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut asm = Assembler::new();
    build(&mut asm);
    asm.finish().expect("function body assembles")
}

/// Encode `builder` and load it back as a bytecode module.
pub fn load(builder: ModuleBuilder) -> Arc<BytecodeModule> {
    BytecodeModule::create(
        builder.build().to_bytes(),
        SystemAllocator::shared(),
        SystemAllocator::shared(),
    )
    .expect("module loads")
}
