//! Bytecode system for the register VM
//!
//! This crate owns everything about a module before it is instantiated:
//! the binary format, its logical model, the verifier that decides whether a
//! candidate may be used, and the instruction encoding the dispatch loop
//! decodes.
//!
//! # Features
//!
//! - Zero-copy decoding of the `BMOD` binary format
//! - Ordered, short-circuiting structural verification
//! - Compact fixed-width instruction encoding with register lists
//! - Label-based assembler and module builder for producing modules
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{
//!     verify, Assembler, FunctionSignature, Instruction, ModuleBuilder, ModuleDef,
//!     RegisterLayout, RegisterOperand, ValueType,
//! };
//!
//! let mut asm = Assembler::new();
//! asm.emit(&Instruction::ConstI32 { value: 42, dst: 0 });
//! asm.emit(&Instruction::ret(&[RegisterOperand::i32(0)]));
//!
//! let mut builder = ModuleBuilder::new("answer");
//! let main = builder.add_function(
//!     "main",
//!     FunctionSignature::new(vec![], vec![ValueType::I32]),
//!     &asm.finish().unwrap(),
//!     RegisterLayout::new(1, 0),
//! );
//! builder.add_export("main", main);
//!
//! let bytes: Arc<[u8]> = builder.build().to_bytes().into();
//! let def = ModuleDef::from_bytes(bytes).unwrap();
//! verify(&def).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod format;
pub mod instruction;
pub mod module_def;
pub mod opcode;
pub mod verifier;

// Re-export main types at crate root
pub use assembler::{Assembler, Label};
pub use format::{has_module_identifier, ModuleHeader, HEADER_SIZE, MODULE_IDENTIFIER};
pub use instruction::{
    register_list, BinaryOp, CompareOp, Instruction, RegisterList, RegisterOperand,
    MAX_REGISTER_LIST,
};
pub use module_def::{
    ExportDef, FunctionDescriptor, FunctionSignature, ImportDef, InternalFunctionDef,
    ModuleBuilder, ModuleDef, ModuleStateDef, RegisterLayout, RodataSegmentDef, ValueType,
    I32_REGISTER_COUNT, MAX_GLOBAL_BYTES, MAX_GLOBAL_REFS, REF_REGISTER_COUNT,
};
pub use opcode::Opcode;
pub use verifier::verify;
