//! Host-backed modules
//!
//! A [`NativeModule`] implements the module interface with Rust closures in
//! place of bytecode. Every function is both internal and exported under the
//! same ordinal, and the module has no imports. Bytecode modules usually
//! import from one to reach host services.
//!
//! # Example
//!
//! ```
//! use bytecode_system::{FunctionSignature, ValueType};
//! use interpreter::{Linkage, Module, NativeModule, Value};
//!
//! let math = NativeModule::builder("math")
//!     .function(
//!         "double",
//!         FunctionSignature::new(vec![ValueType::I32], vec![ValueType::I32]),
//!         |args: &[Value]| Ok(vec![Value::I32(args[0].as_i32().unwrap_or(0) * 2)]),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(math.lookup_function(Linkage::Export, "double").is_ok());
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use bytecode_system::{FunctionSignature, RegisterLayout};
use core_types::{VmError, VmResult};
use memory_manager::Allocator;

use crate::module::{FunctionInfo, FunctionRef, Linkage, Module, ModuleId, ModuleSignature};
use crate::module_state::{ModuleState, StateLayout};
use crate::stack::{ExecutionResult, Stack};
use crate::value::Value;

/// Body of a host function.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> VmResult<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
struct NativeFunction {
    name: String,
    signature: FunctionSignature,
    body: NativeFn,
}

/// Builder for [`NativeModule`].
pub struct NativeModuleBuilder {
    name: String,
    functions: Vec<NativeFunction>,
}

impl NativeModuleBuilder {
    /// Add a function. Ordinals follow insertion order.
    pub fn function<F>(mut self, name: impl Into<String>, signature: FunctionSignature, body: F) -> Self
    where
        F: Fn(&[Value]) -> VmResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.functions.push(NativeFunction {
            name: name.into(),
            signature,
            body: Arc::new(body),
        });
        self
    }

    /// Finish the module.
    ///
    /// Fails with `InvalidArgument` for an empty module name, an empty
    /// function name, a duplicate function name or a module with no
    /// functions.
    pub fn build(self) -> VmResult<Arc<NativeModule>> {
        if self.name.is_empty() {
            return Err(VmError::invalid_argument("native module name is empty"));
        }
        if self.functions.is_empty() {
            return Err(VmError::invalid_argument(format!(
                "native module {} has no functions",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for function in &self.functions {
            if function.name.is_empty() || !seen.insert(function.name.as_str()) {
                return Err(VmError::invalid_argument(format!(
                    "native module {} has an empty or duplicate function name {:?}",
                    self.name, function.name
                )));
            }
        }

        let id = ModuleId::next();
        debug!(module = %self.name, id = %id, functions = self.functions.len(), "created native module");
        Ok(Arc::new_cyclic(|this| NativeModule {
            id,
            name: self.name,
            functions: self.functions,
            this: this.clone(),
        }))
    }
}

/// A module whose functions are host closures.
pub struct NativeModule {
    id: ModuleId,
    name: String,
    functions: Vec<NativeFunction>,
    this: Weak<NativeModule>,
}

impl NativeModule {
    /// Start building a module called `name`.
    pub fn builder(name: impl Into<String>) -> NativeModuleBuilder {
        NativeModuleBuilder {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    fn handle(&self) -> VmResult<Arc<dyn Module>> {
        let this: Arc<dyn Module> = self
            .this
            .upgrade()
            .ok_or_else(|| VmError::invalid_argument("module is being destroyed"))?;
        Ok(this)
    }

    fn function(&self, linkage: Linkage, ordinal: usize) -> VmResult<&NativeFunction> {
        let found = match linkage {
            Linkage::Import => None,
            Linkage::Internal | Linkage::Export => self.functions.get(ordinal),
        };
        found.ok_or_else(|| {
            VmError::invalid_argument(format!(
                "{} function ordinal {} out of range for module {}",
                linkage, ordinal, self.name
            ))
        })
    }

    fn check_owner(&self, state: &ModuleState) -> VmResult<()> {
        if state.owner() != self.id {
            return Err(VmError::invalid_argument(format!(
                "module state belongs to module {}, not {}",
                state.owner(),
                self.name
            )));
        }
        Ok(())
    }

    fn call_top(&self, stack: &mut Stack) -> VmResult<ExecutionResult> {
        let frame = stack
            .top()
            .ok_or_else(|| VmError::fault("native call with no live frame"))?;
        if frame.state().lock().is_freed() {
            return Err(VmError::fault("module state has been freed"));
        }
        let function = self.function(Linkage::Internal, frame.function().ordinal)?;
        let args = frame.registers().arguments(&function.signature)?;
        trace!(module = %self.name, function = %function.name, "native call");
        let results = (function.body)(&args)?;
        stack.complete_frame(results)?;
        Ok(ExecutionResult::Returned)
    }
}

impl Module for NativeModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> ModuleSignature {
        ModuleSignature {
            import_function_count: 0,
            export_function_count: self.functions.len(),
            internal_function_count: self.functions.len(),
        }
    }

    fn get_function(&self, linkage: Linkage, ordinal: usize) -> VmResult<FunctionInfo> {
        let function = self.function(linkage, ordinal)?;
        Ok(FunctionInfo {
            function: FunctionRef::new(self.handle()?, Linkage::Internal, ordinal),
            name: function.name.clone(),
            signature: function.signature.clone(),
        })
    }

    fn lookup_function(&self, linkage: Linkage, name: &str) -> VmResult<FunctionRef> {
        let ordinal = match linkage {
            Linkage::Import => None,
            Linkage::Internal | Linkage::Export => {
                self.functions.iter().position(|f| !name.is_empty() && f.name == name)
            }
        };
        match ordinal {
            Some(ordinal) => Ok(FunctionRef::new(self.handle()?, Linkage::Internal, ordinal)),
            None => Err(VmError::not_found(format!(
                "no {} function named {:?} in module {}",
                linkage, name, self.name
            ))),
        }
    }

    fn register_layout(&self, function: &FunctionRef) -> VmResult<RegisterLayout> {
        if !function.belongs_to(self.id) || function.linkage != Linkage::Internal {
            return Err(VmError::invalid_argument(format!(
                "{} function {} is not an internal function of {}",
                function.linkage,
                function.ordinal,
                self.name
            )));
        }
        Ok(self
            .function(Linkage::Internal, function.ordinal)?
            .signature
            .argument_layout())
    }

    fn alloc_state(&self, allocator: Arc<dyn Allocator>) -> VmResult<ModuleState> {
        ModuleState::new(self.id, allocator, StateLayout::default())
    }

    fn free_state(&self, state: &mut ModuleState) -> VmResult<()> {
        self.check_owner(state)?;
        state.release()
    }

    fn resolve_import(
        &self,
        _state: &mut ModuleState,
        ordinal: usize,
        _function: FunctionRef,
    ) -> VmResult<()> {
        Err(VmError::invalid_argument(format!(
            "native module {} has no import {}",
            self.name, ordinal
        )))
    }

    fn execute(&self, stack: &mut Stack) -> VmResult<ExecutionResult> {
        if let Some(pending) = stack.begin_execute(self)? {
            return Ok(pending);
        }
        let outcome = self.call_top(stack);
        stack.finish_execute(outcome)
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        f.debug_struct("NativeModule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("functions", &names)
            .finish()
    }
}
