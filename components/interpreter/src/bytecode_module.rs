//! Bytecode-backed modules.

use std::mem;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use bytecode_system::{verify, ModuleDef, RegisterLayout};
use core_types::{VmError, VmResult};
use memory_manager::{Allocator, ConstBuffer, VmRef};

use crate::dispatch;
use crate::module::{FunctionInfo, FunctionRef, Linkage, Module, ModuleId, ModuleSignature};
use crate::module_state::{ModuleState, StateLayout};
use crate::stack::{ExecutionResult, Stack};

/// A verified module whose functions run in the dispatch loop.
///
/// The module owns its loaded buffer; the bytecode blob and rodata segments
/// of its definition are spans into that buffer. Dropping the last handle
/// returns the buffer and module bytes to the allocators given at creation.
pub struct BytecodeModule {
    id: ModuleId,
    def: ModuleDef,
    buffer_allocator: Arc<dyn Allocator>,
    buffer_bytes: usize,
    module_allocator: Arc<dyn Allocator>,
    module_bytes: usize,
    this: Weak<BytecodeModule>,
}

impl BytecodeModule {
    /// Load, verify and wrap a binary module.
    ///
    /// The buffer is charged to `buffer_allocator` and the module itself to
    /// `module_allocator`, both only after verification succeeds. Every
    /// malformed buffer fails with `InvalidArgument` and allocates nothing.
    pub fn create(
        buffer: impl Into<Arc<[u8]>>,
        buffer_allocator: Arc<dyn Allocator>,
        module_allocator: Arc<dyn Allocator>,
    ) -> VmResult<Arc<Self>> {
        let buffer = buffer.into();
        let buffer_bytes = buffer.len();
        let def = ModuleDef::from_bytes(buffer).map_err(|e| {
            warn!(error = %e, "rejected module buffer");
            e
        })?;
        Self::instantiate(def, buffer_allocator, buffer_bytes, module_allocator)
    }

    /// Verify and wrap an in-memory definition.
    pub fn from_def(def: ModuleDef, module_allocator: Arc<dyn Allocator>) -> VmResult<Arc<Self>> {
        let buffer_allocator = Arc::clone(&module_allocator);
        Self::instantiate(def, buffer_allocator, 0, module_allocator)
    }

    fn instantiate(
        def: ModuleDef,
        buffer_allocator: Arc<dyn Allocator>,
        buffer_bytes: usize,
        module_allocator: Arc<dyn Allocator>,
    ) -> VmResult<Arc<Self>> {
        if let Err(e) = verify(&def) {
            warn!(module = %def.name, error = %e, "module failed verification");
            return Err(e);
        }

        let module_bytes = mem::size_of::<Self>();
        buffer_allocator.allocate(buffer_bytes)?;
        if let Err(e) = module_allocator.allocate(module_bytes) {
            buffer_allocator.deallocate(buffer_bytes);
            return Err(e);
        }

        let id = ModuleId::next();
        debug!(
            module = %def.name,
            id = %id,
            functions = def.internal_functions.len(),
            "loaded bytecode module"
        );
        Ok(Arc::new_cyclic(|this| Self {
            id,
            def,
            buffer_allocator,
            buffer_bytes,
            module_allocator,
            module_bytes,
            this: this.clone(),
        }))
    }

    /// The verified definition.
    pub fn definition(&self) -> &ModuleDef {
        &self.def
    }

    fn handle(&self) -> VmResult<Arc<dyn Module>> {
        let this: Arc<dyn Module> = self
            .this
            .upgrade()
            .ok_or_else(|| VmError::invalid_argument("module is being destroyed"))?;
        Ok(this)
    }

    /// Bytecode of internal function `ordinal`.
    pub(crate) fn function_code(&self, ordinal: usize) -> VmResult<&[u8]> {
        let blob = self
            .def
            .bytecode_data
            .as_ref()
            .ok_or_else(|| VmError::fault("module has no bytecode"))?;
        self.def
            .descriptor(ordinal)
            .and_then(|d| d.byte_range(blob.len()))
            .map(|range| &blob.as_slice()[range])
            .ok_or_else(|| VmError::fault(format!("no bytecode for function {}", ordinal)))
    }

    /// Reference to internal function `ordinal` of this module.
    pub(crate) fn internal_ref(&self, ordinal: usize) -> VmResult<FunctionRef> {
        if ordinal >= self.def.internal_functions.len() {
            return Err(VmError::fault(format!(
                "call to internal function {} of {}",
                ordinal,
                self.def.internal_functions.len()
            )));
        }
        Ok(FunctionRef::new(self.handle()?, Linkage::Internal, ordinal))
    }

    fn out_of_range(&self, linkage: Linkage, ordinal: usize, count: usize) -> VmError {
        VmError::invalid_argument(format!(
            "{} function ordinal {} out of range for module {} ({} functions)",
            linkage, ordinal, self.def.name, count
        ))
    }

    fn check_owner(&self, state: &ModuleState) -> VmResult<()> {
        if state.owner() != self.id {
            return Err(VmError::invalid_argument(format!(
                "module state belongs to module {}, not {}",
                state.owner(),
                self.def.name
            )));
        }
        Ok(())
    }
}

impl Module for BytecodeModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn signature(&self) -> ModuleSignature {
        ModuleSignature {
            import_function_count: self.def.imported_functions.len(),
            export_function_count: self.def.exported_functions.len(),
            internal_function_count: self.def.internal_functions.len(),
        }
    }

    fn get_function(&self, linkage: Linkage, ordinal: usize) -> VmResult<FunctionInfo> {
        let def = &self.def;
        let (function, name, signature) = match linkage {
            Linkage::Import => {
                let import = def
                    .imported_functions
                    .get(ordinal)
                    .ok_or_else(|| self.out_of_range(linkage, ordinal, def.imported_functions.len()))?;
                (
                    FunctionRef::new(self.handle()?, Linkage::Import, ordinal),
                    import.full_name.clone(),
                    import.signature.clone(),
                )
            }
            Linkage::Export => {
                let export = def
                    .exported_functions
                    .get(ordinal)
                    .ok_or_else(|| self.out_of_range(linkage, ordinal, def.exported_functions.len()))?;
                (
                    FunctionRef::new(
                        self.handle()?,
                        Linkage::Internal,
                        export.internal_ordinal as usize,
                    ),
                    export.local_name.clone(),
                    export.signature.clone(),
                )
            }
            Linkage::Internal => {
                let function = def
                    .internal_functions
                    .get(ordinal)
                    .ok_or_else(|| self.out_of_range(linkage, ordinal, def.internal_functions.len()))?;
                (
                    FunctionRef::new(self.handle()?, Linkage::Internal, ordinal),
                    function.local_name.clone(),
                    function.signature.clone(),
                )
            }
        };
        Ok(FunctionInfo {
            function,
            name,
            signature: signature.unwrap_or_default(),
        })
    }

    fn lookup_function(&self, linkage: Linkage, name: &str) -> VmResult<FunctionRef> {
        let def = &self.def;
        let found = if name.is_empty() {
            None
        } else {
            match linkage {
                Linkage::Import => def
                    .imported_functions
                    .iter()
                    .position(|f| f.full_name == name)
                    .map(|i| (Linkage::Import, i)),
                Linkage::Export => def
                    .exported_functions
                    .iter()
                    .find(|f| f.local_name == name)
                    .map(|f| (Linkage::Internal, f.internal_ordinal as usize)),
                Linkage::Internal => def
                    .internal_functions
                    .iter()
                    .position(|f| f.local_name == name)
                    .map(|i| (Linkage::Internal, i)),
            }
        };
        match found {
            Some((linkage, ordinal)) => Ok(FunctionRef::new(self.handle()?, linkage, ordinal)),
            None => Err(VmError::not_found(format!(
                "no {} function named {:?} in module {}",
                linkage, name, def.name
            ))),
        }
    }

    fn register_layout(&self, function: &FunctionRef) -> VmResult<RegisterLayout> {
        if !function.belongs_to(self.id) {
            return Err(VmError::invalid_argument(format!(
                "function belongs to module {}, not {}",
                function.module.name(),
                self.def.name
            )));
        }
        if function.linkage != Linkage::Internal {
            return Err(VmError::invalid_argument(format!(
                "register layout requested for {} linkage",
                function.linkage
            )));
        }
        self.def
            .descriptor(function.ordinal)
            .map(|d| d.register_layout())
            .ok_or_else(|| {
                self.out_of_range(
                    Linkage::Internal,
                    function.ordinal,
                    self.def.internal_functions.len(),
                )
            })
    }

    fn alloc_state(&self, allocator: Arc<dyn Allocator>) -> VmResult<ModuleState> {
        let state_def = self.def.state_def();
        let rodata = self
            .def
            .rodata_segments
            .iter()
            .map(|segment| VmRef::new(ConstBuffer::new(segment.name.clone(), segment.data.clone())))
            .collect();
        ModuleState::new(
            self.id,
            allocator,
            StateLayout {
                global_bytes: state_def.global_bytes_capacity as usize,
                global_refs: state_def.global_ref_count as usize,
                rodata,
                import_count: self.def.imported_functions.len(),
            },
        )
    }

    fn free_state(&self, state: &mut ModuleState) -> VmResult<()> {
        self.check_owner(state)?;
        state.release()
    }

    fn resolve_import(
        &self,
        state: &mut ModuleState,
        ordinal: usize,
        function: FunctionRef,
    ) -> VmResult<()> {
        self.check_owner(state)?;
        if ordinal >= self.def.imported_functions.len() {
            return Err(self.out_of_range(Linkage::Import, ordinal, self.def.imported_functions.len()));
        }
        debug!(
            module = %self.def.name,
            import = %self.def.imported_functions[ordinal].full_name,
            target = function.module.name(),
            "resolved import"
        );
        state.set_import(ordinal, function)
    }

    fn execute(&self, stack: &mut Stack) -> VmResult<ExecutionResult> {
        if let Some(pending) = stack.begin_execute(self)? {
            return Ok(pending);
        }
        let outcome = dispatch::run(self, stack);
        stack.finish_execute(outcome)
    }
}

impl Drop for BytecodeModule {
    fn drop(&mut self) {
        self.buffer_allocator.deallocate(self.buffer_bytes);
        self.module_allocator.deallocate(self.module_bytes);
        debug!(module = %self.def.name, "destroyed bytecode module");
    }
}

impl std::fmt::Debug for BytecodeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeModule")
            .field("id", &self.id)
            .field("name", &self.def.name)
            .field("signature", &self.signature())
            .finish()
    }
}
