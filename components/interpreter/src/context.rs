//! Host execution context
//!
//! A [`Context`] owns a set of modules, one state per module and the table
//! stacks use to find those states. Modules are registered in dependency
//! order: each import `module.function` is bound to the export of an
//! already registered module when its importer is registered.

use std::sync::Arc;

use tracing::{debug, warn};

use core_types::{VmError, VmResult};
use memory_manager::{Allocator, SystemAllocator};

use crate::config::RuntimeConfig;
use crate::module::{FunctionRef, Linkage, Module};
use crate::module_state::{ModuleState, ModuleStateRef, StateResolver, StateTable};
use crate::stack::{ExecutionResult, Stack};
use crate::value::Value;

/// Registered modules and their states.
pub struct Context {
    config: RuntimeConfig,
    allocator: Arc<dyn Allocator>,
    modules: Vec<Arc<dyn Module>>,
    states: Arc<StateTable>,
}

impl Context {
    /// Create an empty context using the system allocator for states.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_allocator(config, SystemAllocator::shared())
    }

    /// Create an empty context charging states to `allocator`.
    pub fn with_allocator(config: RuntimeConfig, allocator: Arc<dyn Allocator>) -> Self {
        Self {
            config,
            allocator,
            modules: Vec::new(),
            states: Arc::new(StateTable::new()),
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registered modules in registration order.
    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Registered module called `name`.
    pub fn module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    /// State allocated for `module`.
    pub fn state_of(&self, module: &dyn Module) -> Option<ModuleStateRef> {
        self.states.state_for(module.id())
    }

    /// The table stacks of this context resolve states through.
    pub fn resolver(&self) -> Arc<dyn StateResolver> {
        let table: Arc<dyn StateResolver> = self.states.clone();
        table
    }

    /// Register `module`, allocating its state and resolving its imports.
    ///
    /// Fails with `InvalidArgument` for a duplicate module name, a malformed
    /// import name or an import whose signature differs from the export it
    /// names, and with `NotFound` if the export does not exist. A failed
    /// registration leaves the context unchanged.
    pub fn register_module(&mut self, module: Arc<dyn Module>) -> VmResult<()> {
        if self.module(module.name()).is_some() {
            return Err(VmError::invalid_argument(format!(
                "module {} is already registered",
                module.name()
            )));
        }
        let mut state = module.alloc_state(Arc::clone(&self.allocator))?;
        if let Err(e) = self.resolve_imports(module.as_ref(), &mut state) {
            if let Err(free) = module.free_state(&mut state) {
                warn!(module = module.name(), error = %free, "failed to free state");
            }
            return Err(e);
        }
        self.states.insert(module.id(), state);
        debug!(
            module = module.name(),
            id = %module.id(),
            imports = module.signature().import_function_count,
            "registered module"
        );
        self.modules.push(module);
        Ok(())
    }

    fn resolve_imports(&self, module: &dyn Module, state: &mut ModuleState) -> VmResult<()> {
        for ordinal in 0..module.signature().import_function_count {
            let import = module.get_function(Linkage::Import, ordinal)?;
            let (target_name, function_name) = split_qualified(&import.name)?;
            let target = self.module(target_name).ok_or_else(|| {
                VmError::not_found(format!(
                    "import {} of module {} names unregistered module {}",
                    import.name,
                    module.name(),
                    target_name
                ))
            })?;
            let export = target.lookup_function(Linkage::Export, function_name)?;
            let export_info = target.get_function(export.linkage, export.ordinal)?;
            if export_info.signature != import.signature {
                return Err(VmError::invalid_argument(format!(
                    "import {} of module {} expects {:?} but the export has {:?}",
                    import.name,
                    module.name(),
                    import.signature,
                    export_info.signature
                )));
            }
            module.resolve_import(state, ordinal, export)?;
        }
        Ok(())
    }

    /// Find the export named by `module.function`.
    pub fn lookup(&self, full_name: &str) -> VmResult<FunctionRef> {
        let (module_name, function_name) = split_qualified(full_name)?;
        let module = self
            .module(module_name)
            .ok_or_else(|| VmError::not_found(format!("no module named {}", module_name)))?;
        module.lookup_function(Linkage::Export, function_name)
    }

    /// A fresh stack resolving states through this context.
    pub fn new_stack(&self) -> Stack {
        Stack::new(self.resolver(), &self.config)
    }

    /// Run `function` to completion on a fresh stack.
    ///
    /// Yields resume immediately; awaits block the calling thread for up to
    /// the configured await timeout, after which `DeadlineExceeded` is
    /// returned.
    pub fn invoke(&self, function: &FunctionRef, args: Vec<Value>) -> VmResult<Vec<Value>> {
        let mut stack = self.new_stack();
        stack.push_call(function.clone(), args)?;
        loop {
            match stack.run()? {
                ExecutionResult::Returned => return Ok(stack.take_results()),
                ExecutionResult::Yielded => continue,
                ExecutionResult::Awaiting(wait) => wait.wait(Some(self.config.await_timeout()))?,
            }
        }
    }
}

fn split_qualified(full_name: &str) -> VmResult<(&str, &str)> {
    match full_name.split_once('.') {
        Some((module, function)) if !module.is_empty() && !function.is_empty() => Ok((module, function)),
        _ => Err(VmError::invalid_argument(format!(
            "{:?} is not a qualified module.function name",
            full_name
        ))),
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for module in self.modules.iter().rev() {
            if let Some(state) = self.states.remove(module.id()) {
                let mut state = state.lock();
                if state.is_freed() {
                    continue;
                }
                if let Err(e) = module.free_state(&mut state) {
                    warn!(module = module.name(), error = %e, "failed to free state");
                }
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("modules", &names)
            .finish()
    }
}
