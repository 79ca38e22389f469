//! Binary Format Model - the logical contents of a bytecode module
//!
//! A [`ModuleDef`] is what the upstream compiler produces: the module name,
//! function tables and signatures, per-function descriptors into the bytecode
//! blob, read-only data segments and the module-state layout. It is immutable
//! once loaded; the verifier decides whether it may be used at all.

use std::ops::Range;

use core_types::ByteSpan;

/// Number of i32 registers in a frame's register file.
pub const I32_REGISTER_COUNT: usize = 128;

/// Number of reference registers in a frame's register file.
pub const REF_REGISTER_COUNT: usize = 64;

/// Largest scalar-global byte region a module may declare.
pub const MAX_GLOBAL_BYTES: u32 = 16 * 1024 * 1024;

/// Largest number of reference globals a module may declare.
pub const MAX_GLOBAL_REFS: u32 = 65536;

/// Type of a function argument or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit integer held in an i32 register
    I32,
    /// Reference-counted object held in a ref register
    Ref,
}

impl ValueType {
    /// Decode the binary type code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ValueType::I32),
            1 => Some(ValueType::Ref),
            _ => None,
        }
    }

    /// Binary type code.
    pub fn to_u8(self) -> u8 {
        match self {
            ValueType::I32 => 0,
            ValueType::Ref => 1,
        }
    }
}

/// Calling convention of a function: argument and result types in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionSignature {
    /// Argument types
    pub argument_types: Vec<ValueType>,
    /// Result types
    pub result_types: Vec<ValueType>,
}

impl FunctionSignature {
    /// Create a signature.
    pub fn new(argument_types: Vec<ValueType>, result_types: Vec<ValueType>) -> Self {
        Self {
            argument_types,
            result_types,
        }
    }

    /// Total number of arguments.
    pub fn argument_count(&self) -> usize {
        self.argument_types.len()
    }

    /// Total number of results.
    pub fn result_count(&self) -> usize {
        self.result_types.len()
    }

    /// Registers needed to receive the arguments.
    pub fn argument_layout(&self) -> RegisterLayout {
        RegisterLayout::covering(&self.argument_types)
    }
}

/// Register requirements of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterLayout {
    /// Number of i32 registers used
    pub i32_count: u16,
    /// Number of ref registers used
    pub ref_count: u16,
}

impl RegisterLayout {
    /// Create a layout.
    pub fn new(i32_count: u16, ref_count: u16) -> Self {
        Self {
            i32_count,
            ref_count,
        }
    }

    /// Smallest layout holding one register per value of `types`.
    pub fn covering(types: &[ValueType]) -> Self {
        let i32_count = types.iter().filter(|t| **t == ValueType::I32).count();
        let ref_count = types.len() - i32_count;
        Self {
            i32_count: i32_count.min(u16::MAX as usize) as u16,
            ref_count: ref_count.min(u16::MAX as usize) as u16,
        }
    }

    /// Returns true if the layout fits the machine register files.
    pub fn fits_machine(&self) -> bool {
        self.i32_count as usize <= I32_REGISTER_COUNT
            && self.ref_count as usize <= REF_REGISTER_COUNT
    }
}

/// A function imported from another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDef {
    /// Fully qualified name, `module.function`
    pub full_name: String,
    /// Expected signature
    pub signature: Option<FunctionSignature>,
}

/// A function made visible to other modules and hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDef {
    /// Name within this module
    pub local_name: String,
    /// Signature of the exported function
    pub signature: Option<FunctionSignature>,
    /// Index into the internal function table
    pub internal_ordinal: i32,
}

/// A function defined by this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalFunctionDef {
    /// Name within this module; may be empty for unreflected functions
    pub local_name: String,
    /// Signature
    pub signature: Option<FunctionSignature>,
    /// Optional source label used in diagnostics
    pub debug_label: Option<String>,
}

/// Where an internal function's bytecode lives and what registers it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Byte offset into the bytecode blob
    pub bytecode_offset: i32,
    /// Byte length of the function body
    pub bytecode_length: i32,
    /// Required i32 registers
    pub i32_register_count: u16,
    /// Required ref registers
    pub ref_register_count: u16,
}

impl FunctionDescriptor {
    /// Byte range of the function body, if offset and length are valid and
    /// the range lies within a blob of `blob_len` bytes.
    pub fn byte_range(&self, blob_len: usize) -> Option<Range<usize>> {
        let offset = usize::try_from(self.bytecode_offset).ok()?;
        let length = usize::try_from(self.bytecode_length).ok()?;
        let end = offset.checked_add(length)?;
        if end > blob_len {
            return None;
        }
        Some(offset..end)
    }

    /// Register requirements.
    pub fn register_layout(&self) -> RegisterLayout {
        RegisterLayout::new(self.i32_register_count, self.ref_register_count)
    }
}

/// A named read-only data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RodataSegmentDef {
    /// Segment name
    pub name: String,
    /// Segment contents
    pub data: ByteSpan,
}

/// Size of the mutable per-instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleStateDef {
    /// Bytes of scalar globals
    pub global_bytes_capacity: u32,
    /// Number of reference globals
    pub global_ref_count: u32,
}

/// The logical contents of a bytecode module.
///
/// Fields mirror the binary layout, including the ones that may be missing
/// in a malformed candidate (`None` descriptors or bytecode, empty names or
/// absent signatures); [`crate::verify`] rejects those.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleDef {
    /// Module name used during import resolution
    pub name: String,
    /// Imported functions
    pub imported_functions: Vec<ImportDef>,
    /// Exported functions
    pub exported_functions: Vec<ExportDef>,
    /// Internal function table
    pub internal_functions: Vec<InternalFunctionDef>,
    /// One descriptor per internal function
    pub function_descriptors: Option<Vec<FunctionDescriptor>>,
    /// Bytecode blob
    pub bytecode_data: Option<ByteSpan>,
    /// Read-only data segments
    pub rodata_segments: Vec<RodataSegmentDef>,
    /// Module state layout
    pub module_state: Option<ModuleStateDef>,
}

impl ModuleDef {
    /// Descriptor of internal function `ordinal`.
    pub fn descriptor(&self, ordinal: usize) -> Option<&FunctionDescriptor> {
        self.function_descriptors.as_ref()?.get(ordinal)
    }

    /// Module state layout, defaulting to empty.
    pub fn state_def(&self) -> ModuleStateDef {
        self.module_state.unwrap_or_default()
    }
}

/// Incremental builder for [`ModuleDef`]s.
///
/// # Example
///
/// ```
/// use bytecode_system::{Assembler, FunctionSignature, Instruction, ModuleBuilder, RegisterLayout, ValueType};
///
/// let mut asm = Assembler::new();
/// asm.emit(&Instruction::ConstI32 { value: 7, dst: 0 });
/// asm.emit(&Instruction::ret(&[bytecode_system::RegisterOperand::i32(0)]));
///
/// let mut builder = ModuleBuilder::new("demo");
/// let main = builder.add_function(
///     "main",
///     FunctionSignature::new(vec![], vec![ValueType::I32]),
///     &asm.finish().unwrap(),
///     RegisterLayout::new(1, 0),
/// );
/// builder.add_export("main", main);
/// let def = builder.build();
/// assert!(bytecode_system::verify(&def).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    def: ModuleDef,
    descriptors: Vec<FunctionDescriptor>,
    bytecode: Vec<u8>,
}

impl ModuleBuilder {
    /// Start a module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: ModuleDef {
                name: name.into(),
                ..ModuleDef::default()
            },
            descriptors: Vec::new(),
            bytecode: Vec::new(),
        }
    }

    /// Declare an import and return its ordinal.
    pub fn add_import(&mut self, full_name: impl Into<String>, signature: FunctionSignature) -> usize {
        self.def.imported_functions.push(ImportDef {
            full_name: full_name.into(),
            signature: Some(signature),
        });
        self.def.imported_functions.len() - 1
    }

    /// Append an internal function body and return its ordinal.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        signature: FunctionSignature,
        code: &[u8],
        layout: RegisterLayout,
    ) -> usize {
        let offset = self.bytecode.len();
        self.bytecode.extend_from_slice(code);
        self.descriptors.push(FunctionDescriptor {
            bytecode_offset: offset as i32,
            bytecode_length: code.len() as i32,
            i32_register_count: layout.i32_count,
            ref_register_count: layout.ref_count,
        });
        self.def.internal_functions.push(InternalFunctionDef {
            local_name: name.into(),
            signature: Some(signature),
            debug_label: None,
        });
        self.def.internal_functions.len() - 1
    }

    /// Attach a source label to an internal function.
    pub fn set_debug_label(&mut self, ordinal: usize, label: impl Into<String>) {
        if let Some(function) = self.def.internal_functions.get_mut(ordinal) {
            function.debug_label = Some(label.into());
        }
    }

    /// Export internal function `internal_ordinal` as `name`.
    ///
    /// The export takes the internal function's signature.
    pub fn add_export(&mut self, name: impl Into<String>, internal_ordinal: usize) -> usize {
        let signature = self
            .def
            .internal_functions
            .get(internal_ordinal)
            .and_then(|f| f.signature.clone());
        self.def.exported_functions.push(ExportDef {
            local_name: name.into(),
            signature,
            internal_ordinal: internal_ordinal as i32,
        });
        self.def.exported_functions.len() - 1
    }

    /// Add a read-only data segment and return its ordinal.
    pub fn add_rodata(&mut self, name: impl Into<String>, data: Vec<u8>) -> usize {
        self.def.rodata_segments.push(RodataSegmentDef {
            name: name.into(),
            data: ByteSpan::from(data),
        });
        self.def.rodata_segments.len() - 1
    }

    /// Declare the module state layout.
    pub fn set_module_state(&mut self, global_bytes_capacity: u32, global_ref_count: u32) {
        self.def.module_state = Some(ModuleStateDef {
            global_bytes_capacity,
            global_ref_count,
        });
    }

    /// Finish the definition.
    pub fn build(self) -> ModuleDef {
        let mut def = self.def;
        def.function_descriptors = Some(self.descriptors);
        def.bytecode_data = Some(ByteSpan::from(self.bytecode));
        def
    }
}
