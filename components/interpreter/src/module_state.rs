//! Per-instance mutable module state
//!
//! A [`ModuleState`] is an arena with four typed regions computed once at
//! allocation time: scalar global bytes, reference globals, rodata
//! references and resolved imports. Every access is a bounds-checked index.
//! Access failures made while dispatching are `Fault`s.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use core_types::{VmError, VmResult};
use memory_manager::{assign_ref, Allocator, VmRef};

use crate::module::{FunctionRef, ModuleId};

/// A state shared between the host and the stacks running its module.
pub type ModuleStateRef = Arc<Mutex<ModuleState>>;

/// Sizes of the regions of a new state.
#[derive(Debug, Clone, Default)]
pub struct StateLayout {
    /// Bytes of scalar globals
    pub global_bytes: usize,
    /// Number of reference globals
    pub global_refs: usize,
    /// Constant buffer references, one per rodata segment
    pub rodata: Vec<VmRef>,
    /// Number of imports
    pub import_count: usize,
}

impl StateLayout {
    fn reserved_bytes(&self) -> usize {
        self.global_bytes
            + self.global_refs * mem::size_of::<Option<VmRef>>()
            + self.rodata.len() * mem::size_of::<VmRef>()
            + self.import_count * mem::size_of::<Option<FunctionRef>>()
    }
}

/// Mutable state of one module instantiation.
#[derive(Debug)]
pub struct ModuleState {
    owner: ModuleId,
    allocator: Arc<dyn Allocator>,
    reserved_bytes: usize,
    global_bytes: Vec<u8>,
    global_refs: Vec<Option<VmRef>>,
    rodata_refs: Vec<VmRef>,
    imports: Vec<Option<FunctionRef>>,
    freed: bool,
}

impl ModuleState {
    /// Allocate a zeroed state owned by module `owner`.
    ///
    /// The region sizes are charged to `allocator`; a refusal is returned
    /// unchanged.
    pub fn new(owner: ModuleId, allocator: Arc<dyn Allocator>, layout: StateLayout) -> VmResult<Self> {
        let reserved_bytes = layout.reserved_bytes();
        allocator.allocate(reserved_bytes)?;
        debug!(module = %owner, bytes = reserved_bytes, "allocated module state");
        Ok(Self {
            owner,
            allocator,
            reserved_bytes,
            global_bytes: vec![0; layout.global_bytes],
            global_refs: vec![None; layout.global_refs],
            rodata_refs: layout.rodata,
            imports: vec![None; layout.import_count],
            freed: false,
        })
    }

    /// Module that allocated this state.
    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    /// Returns true once the state has been freed.
    pub fn is_freed(&self) -> bool {
        self.freed
    }

    /// Bytes charged to the allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    fn live(&self) -> VmResult<()> {
        if self.freed {
            return Err(VmError::fault(format!(
                "module state of module {} has been freed",
                self.owner
            )));
        }
        Ok(())
    }

    fn word_range(&self, offset: u32) -> VmResult<std::ops::Range<usize>> {
        let start = offset as usize;
        if start % 4 != 0 {
            return Err(VmError::fault(format!("misaligned global access at byte {}", offset)));
        }
        match start.checked_add(4) {
            Some(end) if end <= self.global_bytes.len() => Ok(start..end),
            _ => Err(VmError::fault(format!(
                "global access at byte {} outside {} global bytes",
                offset,
                self.global_bytes.len()
            ))),
        }
    }

    /// Read the i32 at byte `offset` of the scalar globals.
    pub fn load_i32(&self, offset: u32) -> VmResult<i32> {
        self.live()?;
        let range = self.word_range(offset)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.global_bytes[range]);
        Ok(i32::from_le_bytes(word))
    }

    /// Write the i32 at byte `offset` of the scalar globals.
    pub fn store_i32(&mut self, offset: u32, value: i32) -> VmResult<()> {
        self.live()?;
        let range = self.word_range(offset)?;
        self.global_bytes[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn global_slot(&mut self, ordinal: u32) -> VmResult<&mut Option<VmRef>> {
        self.live()?;
        let count = self.global_refs.len();
        self.global_refs.get_mut(ordinal as usize).ok_or_else(|| {
            VmError::fault(format!("ref global {} out of range ({} globals)", ordinal, count))
        })
    }

    /// Retain and return the object in ref global `ordinal`.
    pub fn global_ref(&self, ordinal: u32) -> VmResult<Option<VmRef>> {
        self.live()?;
        self.global_refs
            .get(ordinal as usize)
            .cloned()
            .ok_or_else(|| {
                VmError::fault(format!(
                    "ref global {} out of range ({} globals)",
                    ordinal,
                    self.global_refs.len()
                ))
            })
    }

    /// Store into ref global `ordinal`, retaining the new object and
    /// releasing the old one.
    pub fn set_global_ref(&mut self, ordinal: u32, value: Option<&VmRef>) -> VmResult<()> {
        let slot = self.global_slot(ordinal)?;
        assign_ref(slot, value);
        Ok(())
    }

    /// Release ref global `ordinal`.
    pub fn reset_global_ref(&mut self, ordinal: u32) -> VmResult<()> {
        let slot = self.global_slot(ordinal)?;
        *slot = None;
        Ok(())
    }

    /// Number of ref globals holding an object.
    pub fn live_global_refs(&self) -> usize {
        self.global_refs.iter().filter(|slot| slot.is_some()).count()
    }

    /// Retain and return the constant buffer of rodata segment `ordinal`.
    pub fn rodata_ref(&self, ordinal: u32) -> VmResult<VmRef> {
        self.live()?;
        self.rodata_refs.get(ordinal as usize).cloned().ok_or_else(|| {
            VmError::fault(format!(
                "rodata segment {} out of range ({} segments)",
                ordinal,
                self.rodata_refs.len()
            ))
        })
    }

    /// Number of import slots.
    pub fn import_count(&self) -> usize {
        self.imports.len()
    }

    /// Function bound to import `ordinal`.
    ///
    /// Faults if the ordinal is out of range or the import is unresolved.
    pub fn import(&self, ordinal: u32) -> VmResult<FunctionRef> {
        self.live()?;
        match self.imports.get(ordinal as usize) {
            Some(Some(function)) => Ok(function.clone()),
            Some(None) => Err(VmError::fault(format!("import {} is not resolved", ordinal))),
            None => Err(VmError::fault(format!(
                "import {} out of range ({} imports)",
                ordinal,
                self.imports.len()
            ))),
        }
    }

    /// Bind import `ordinal`.
    ///
    /// Fails with `InvalidArgument` if the ordinal is out of range or the
    /// state has been freed.
    pub fn set_import(&mut self, ordinal: usize, function: FunctionRef) -> VmResult<()> {
        if self.freed {
            return Err(VmError::invalid_argument("module state has been freed"));
        }
        let count = self.imports.len();
        let slot = self.imports.get_mut(ordinal).ok_or_else(|| {
            VmError::invalid_argument(format!("import ordinal {} out of range ({} imports)", ordinal, count))
        })?;
        *slot = Some(function);
        Ok(())
    }

    /// Release every held reference and return the reservation.
    ///
    /// Fails with `InvalidArgument` if already released.
    pub fn release(&mut self) -> VmResult<()> {
        if self.freed {
            return Err(VmError::invalid_argument("module state has already been freed"));
        }
        for slot in self.global_refs.iter_mut() {
            *slot = None;
        }
        self.global_refs = Vec::new();
        self.rodata_refs = Vec::new();
        self.imports = Vec::new();
        self.global_bytes = Vec::new();
        self.allocator.deallocate(self.reserved_bytes);
        self.freed = true;
        debug!(module = %self.owner, bytes = self.reserved_bytes, "freed module state");
        Ok(())
    }
}

impl Drop for ModuleState {
    fn drop(&mut self) {
        if !self.freed {
            let _ = self.release();
        }
    }
}

/// Maps a module to the state a call chain uses for it.
pub trait StateResolver: Send + Sync {
    /// State of module `module`, if one is registered.
    fn state_for(&self, module: ModuleId) -> Option<ModuleStateRef>;
}

/// A thread-safe [`StateResolver`] backed by a map.
#[derive(Debug, Default)]
pub struct StateTable {
    states: RwLock<HashMap<ModuleId, ModuleStateRef>>,
}

impl StateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `state` for `module`, returning the shared handle.
    pub fn insert(&self, module: ModuleId, state: ModuleState) -> ModuleStateRef {
        let state = Arc::new(Mutex::new(state));
        self.states.write().insert(module, Arc::clone(&state));
        state
    }

    /// Unregister the state of `module`.
    pub fn remove(&self, module: ModuleId) -> Option<ModuleStateRef> {
        self.states.write().remove(&module)
    }

    /// Number of registered states.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns true if no state is registered.
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl StateResolver for StateTable {
    fn state_for(&self, module: ModuleId) -> Option<ModuleStateRef> {
        self.states.read().get(&module).cloned()
    }
}
