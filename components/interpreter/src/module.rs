//! The polymorphic module interface
//!
//! Every module, whether backed by bytecode or by host closures, exposes the
//! same capability set through the [`Module`] trait. Hosts hold modules as
//! `Arc<dyn Module>`; dropping the last handle destroys the module and
//! returns its memory to the allocators it was created with.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytecode_system::{FunctionSignature, RegisterLayout};
use core_types::{VmError, VmResult};
use memory_manager::Allocator;

use crate::module_state::ModuleState;
use crate::stack::{ExecutionResult, Stack};

/// Process-unique identity of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ModuleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which function table an ordinal indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Functions defined by the module
    Internal,
    /// Functions the module calls in other modules
    Import,
    /// Functions the module makes visible
    Export,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Linkage::Internal => "internal",
            Linkage::Import => "import",
            Linkage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Table sizes of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleSignature {
    /// Number of imported functions
    pub import_function_count: usize,
    /// Number of exported functions
    pub export_function_count: usize,
    /// Number of internal functions
    pub internal_function_count: usize,
}

/// A function of a specific module.
///
/// References handed out for exports always carry internal linkage, so call
/// sites never re-resolve an export.
#[derive(Clone)]
pub struct FunctionRef {
    /// Module owning the function
    pub module: Arc<dyn Module>,
    /// Table the ordinal indexes
    pub linkage: Linkage,
    /// Index within the table
    pub ordinal: usize,
}

impl FunctionRef {
    /// Create a reference.
    pub fn new(module: Arc<dyn Module>, linkage: Linkage, ordinal: usize) -> Self {
        Self {
            module,
            linkage,
            ordinal,
        }
    }

    /// Returns true if the function belongs to module `id`.
    pub fn belongs_to(&self, id: ModuleId) -> bool {
        self.module.id() == id
    }

    /// Rewrite export linkage to the internal function it names.
    ///
    /// Internal references are returned unchanged; import references cannot
    /// be executed and are rejected with `InvalidArgument`.
    pub fn to_internal(&self) -> VmResult<FunctionRef> {
        match self.linkage {
            Linkage::Internal => Ok(self.clone()),
            Linkage::Export => Ok(self.module.get_function(Linkage::Export, self.ordinal)?.function),
            Linkage::Import => Err(VmError::invalid_argument(format!(
                "import {} of module {} cannot be executed directly",
                self.ordinal,
                self.module.name()
            ))),
        }
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        self.module.id() == other.module.id()
            && self.linkage == other.linkage
            && self.ordinal == other.ordinal
    }
}

impl Eq for FunctionRef {}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRef")
            .field("module", &self.module.name())
            .field("linkage", &self.linkage)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// Result of [`Module::get_function`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Executable reference (internal linkage for exports)
    pub function: FunctionRef,
    /// Name in the requested table
    pub name: String,
    /// Calling convention
    pub signature: FunctionSignature,
}

/// Operations every module implementation provides.
///
/// Entry points may be called from any thread. A given [`ModuleState`] must
/// only be used by one call chain at a time.
pub trait Module: Send + Sync + fmt::Debug {
    /// Process-unique identity.
    fn id(&self) -> ModuleId;

    /// Declared module name.
    fn name(&self) -> &str;

    /// Function table sizes.
    fn signature(&self) -> ModuleSignature;

    /// Describe function `ordinal` of the `linkage` table.
    ///
    /// Fails with `InvalidArgument` if the ordinal is out of range.
    fn get_function(&self, linkage: Linkage, ordinal: usize) -> VmResult<FunctionInfo>;

    /// Find a function by exact name with a linear scan of one table.
    ///
    /// Fails with `NotFound` if absent. Callers are expected to cache the
    /// result.
    fn lookup_function(&self, linkage: Linkage, name: &str) -> VmResult<FunctionRef>;

    /// Register requirements of an internal function of this module.
    fn register_layout(&self, function: &FunctionRef) -> VmResult<RegisterLayout>;

    /// Allocate a zeroed module state.
    fn alloc_state(&self, allocator: Arc<dyn Allocator>) -> VmResult<ModuleState>;

    /// Release every live reference in `state` and return its memory.
    ///
    /// Fails with `InvalidArgument` if the state was already freed or was not
    /// allocated by this module.
    fn free_state(&self, state: &mut ModuleState) -> VmResult<()>;

    /// Bind import `ordinal` of `state` to `function`.
    fn resolve_import(
        &self,
        state: &mut ModuleState,
        ordinal: usize,
        function: FunctionRef,
    ) -> VmResult<()>;

    /// Run the top frame of `stack` until it returns, yields, awaits or
    /// faults.
    ///
    /// Fails with `InvalidArgument` if the top frame's function does not
    /// belong to this module or does not have internal linkage.
    fn execute(&self, stack: &mut Stack) -> VmResult<ExecutionResult>;
}
