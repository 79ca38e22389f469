//! Register VM execution core
//!
//! This crate turns verified module definitions into runnable modules and
//! drives call chains through them:
//! - A polymorphic [`Module`] interface shared by bytecode and host modules
//! - Per-instance [`ModuleState`] with bounds-checked globals and imports
//! - Suspendable [`Stack`]s of [`Frame`]s with fixed register banks
//! - A dispatch loop that can yield and await at any call depth
//! - A host [`Context`] that links imports across modules
//!
//! # Example
//!
//! ```
//! use bytecode_system::{
//!     Assembler, BinaryOp, FunctionSignature, Instruction, ModuleBuilder, RegisterLayout,
//!     RegisterOperand, ValueType,
//! };
//! use interpreter::{BytecodeModule, Context, RuntimeConfig, Value};
//! use memory_manager::SystemAllocator;
//!
//! let mut asm = Assembler::new();
//! asm.emit(&Instruction::Binary { op: BinaryOp::Add, lhs: 0, rhs: 1, dst: 0 });
//! asm.emit(&Instruction::ret(&[RegisterOperand::i32(0)]));
//!
//! let mut builder = ModuleBuilder::new("calc");
//! let add = builder.add_function(
//!     "add",
//!     FunctionSignature::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]),
//!     &asm.finish().unwrap(),
//!     RegisterLayout::new(2, 0),
//! );
//! builder.add_export("add", add);
//!
//! let module = BytecodeModule::create(
//!     builder.build().to_bytes(),
//!     SystemAllocator::shared(),
//!     SystemAllocator::shared(),
//! )
//! .unwrap();
//!
//! let mut context = Context::new(RuntimeConfig::default());
//! context.register_module(module).unwrap();
//! let add = context.lookup("calc.add").unwrap();
//! let results = context.invoke(&add, vec![Value::I32(40), Value::I32(2)]).unwrap();
//! assert_eq!(results, vec![Value::I32(42)]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytecode_module;
pub mod call_frame;
pub mod config;
pub mod context;
mod dispatch;
pub mod module;
pub mod module_state;
pub mod native_module;
pub mod stack;
pub mod value;

// Re-export main types at crate root
pub use bytecode_module::BytecodeModule;
pub use call_frame::{Frame, RegisterBank};
pub use config::RuntimeConfig;
pub use context::Context;
pub use module::{FunctionInfo, FunctionRef, Linkage, Module, ModuleId, ModuleSignature};
pub use module_state::{ModuleState, ModuleStateRef, StateLayout, StateResolver, StateTable};
pub use native_module::{NativeFn, NativeModule, NativeModuleBuilder};
pub use stack::{ExecutionResult, Stack, StackStatus};
pub use value::Value;
