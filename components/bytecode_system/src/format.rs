//! Binary module format
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header   u32 payload length | "BMOD" | u16 major | u16 minor | u32 flags
//! payload  name
//!          imports      u32 n { string full_name, opt signature }
//!          exports      u32 n { string local_name, opt signature, i32 internal ordinal }
//!          functions    u32 n { string local_name, opt signature, opt string label }
//!          descriptors  opt { u32 n { i32 offset, i32 length, u16 i32 regs, u16 ref regs } }
//!          bytecode     opt { u32 len, bytes }
//!          rodata       u32 n { string name, u32 len, bytes }
//!          state        opt { u32 global bytes, u32 global refs }
//! ```
//!
//! Decoding never copies the bytecode blob or rodata: both are [`ByteSpan`]s
//! into the caller's buffer.

use std::sync::Arc;

use core_types::{ByteSpan, VmError, VmResult};

use crate::module_def::{
    ExportDef, FunctionDescriptor, FunctionSignature, ImportDef, InternalFunctionDef, ModuleDef,
    ModuleStateDef, RodataSegmentDef, ValueType,
};

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 16;

/// File identifier at bytes 4..8.
pub const MODULE_IDENTIFIER: [u8; 4] = *b"BMOD";

/// Supported major format version.
pub const FORMAT_VERSION_MAJOR: u16 = 1;

/// Minor version written by the encoder.
pub const FORMAT_VERSION_MINOR: u16 = 0;

/// Validated view of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Bytes following the header that belong to the module
    pub payload_length: u32,
    /// Major version
    pub version_major: u16,
    /// Minor version
    pub version_minor: u16,
}

impl ModuleHeader {
    /// Check the header of `buffer` without touching the payload.
    pub fn parse(buffer: &[u8]) -> VmResult<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(VmError::invalid_argument(format!(
                "module buffer of {} bytes is smaller than the {} byte header",
                buffer.len(),
                HEADER_SIZE
            )));
        }
        let mut reader = Reader::new(buffer);
        let payload_length = reader.u32()?;
        if reader.take(4)? != MODULE_IDENTIFIER {
            return Err(VmError::invalid_argument("module identifier mismatch"));
        }
        let version_major = reader.u16()?;
        let version_minor = reader.u16()?;
        let flags = reader.u32()?;
        if version_major != FORMAT_VERSION_MAJOR {
            return Err(VmError::invalid_argument(format!(
                "unsupported module format version {}",
                version_major
            )));
        }
        if flags != 0 {
            return Err(VmError::invalid_argument(format!(
                "unsupported module flags {:#x}",
                flags
            )));
        }
        if payload_length as usize > buffer.len() - HEADER_SIZE {
            return Err(VmError::invalid_argument(format!(
                "module payload of {} bytes exceeds the {} bytes available",
                payload_length,
                buffer.len() - HEADER_SIZE
            )));
        }
        Ok(Self {
            payload_length,
            version_major,
            version_minor,
        })
    }
}

impl ModuleDef {
    /// Serialize to the binary module format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();

        write_string(&mut payload, &self.name);

        write_u32(&mut payload, self.imported_functions.len() as u32);
        for import in &self.imported_functions {
            write_string(&mut payload, &import.full_name);
            write_opt_signature(&mut payload, import.signature.as_ref());
        }

        write_u32(&mut payload, self.exported_functions.len() as u32);
        for export in &self.exported_functions {
            write_string(&mut payload, &export.local_name);
            write_opt_signature(&mut payload, export.signature.as_ref());
            payload.extend_from_slice(&export.internal_ordinal.to_le_bytes());
        }

        write_u32(&mut payload, self.internal_functions.len() as u32);
        for function in &self.internal_functions {
            write_string(&mut payload, &function.local_name);
            write_opt_signature(&mut payload, function.signature.as_ref());
            match &function.debug_label {
                Some(label) => {
                    payload.push(1);
                    write_string(&mut payload, label);
                }
                None => payload.push(0),
            }
        }

        match &self.function_descriptors {
            Some(descriptors) => {
                payload.push(1);
                write_u32(&mut payload, descriptors.len() as u32);
                for d in descriptors {
                    payload.extend_from_slice(&d.bytecode_offset.to_le_bytes());
                    payload.extend_from_slice(&d.bytecode_length.to_le_bytes());
                    payload.extend_from_slice(&d.i32_register_count.to_le_bytes());
                    payload.extend_from_slice(&d.ref_register_count.to_le_bytes());
                }
            }
            None => payload.push(0),
        }

        match &self.bytecode_data {
            Some(code) => {
                payload.push(1);
                write_bytes(&mut payload, code);
            }
            None => payload.push(0),
        }

        write_u32(&mut payload, self.rodata_segments.len() as u32);
        for segment in &self.rodata_segments {
            write_string(&mut payload, &segment.name);
            write_bytes(&mut payload, &segment.data);
        }

        match &self.module_state {
            Some(state) => {
                payload.push(1);
                write_u32(&mut payload, state.global_bytes_capacity);
                write_u32(&mut payload, state.global_ref_count);
            }
            None => payload.push(0),
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        write_u32(&mut bytes, payload.len() as u32);
        bytes.extend_from_slice(&MODULE_IDENTIFIER);
        bytes.extend_from_slice(&FORMAT_VERSION_MAJOR.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_VERSION_MINOR.to_le_bytes());
        write_u32(&mut bytes, 0);
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Parse a module from the binary format.
    ///
    /// The header is checked before anything else is read. The returned
    /// definition shares `buffer`; it is not verified.
    pub fn from_bytes(buffer: Arc<[u8]>) -> VmResult<Self> {
        let header = ModuleHeader::parse(&buffer)?;
        let payload_end = HEADER_SIZE + header.payload_length as usize;
        let mut reader = Reader::new(&buffer[..payload_end]);
        reader.pos = HEADER_SIZE;

        let name = reader.string()?;

        let count = reader.count(5)?;
        let mut imported_functions = Vec::with_capacity(count);
        for _ in 0..count {
            imported_functions.push(ImportDef {
                full_name: reader.string()?,
                signature: reader.opt_signature()?,
            });
        }

        let count = reader.count(9)?;
        let mut exported_functions = Vec::with_capacity(count);
        for _ in 0..count {
            exported_functions.push(ExportDef {
                local_name: reader.string()?,
                signature: reader.opt_signature()?,
                internal_ordinal: reader.i32()?,
            });
        }

        let count = reader.count(6)?;
        let mut internal_functions = Vec::with_capacity(count);
        for _ in 0..count {
            let local_name = reader.string()?;
            let signature = reader.opt_signature()?;
            let debug_label = if reader.flag()? {
                Some(reader.string()?)
            } else {
                None
            };
            internal_functions.push(InternalFunctionDef {
                local_name,
                signature,
                debug_label,
            });
        }

        let function_descriptors = if reader.flag()? {
            let count = reader.count(12)?;
            let mut descriptors = Vec::with_capacity(count);
            for _ in 0..count {
                descriptors.push(FunctionDescriptor {
                    bytecode_offset: reader.i32()?,
                    bytecode_length: reader.i32()?,
                    i32_register_count: reader.u16()?,
                    ref_register_count: reader.u16()?,
                });
            }
            Some(descriptors)
        } else {
            None
        };

        let bytecode_data = if reader.flag()? {
            Some(reader.span(&buffer)?)
        } else {
            None
        };

        let count = reader.count(8)?;
        let mut rodata_segments = Vec::with_capacity(count);
        for _ in 0..count {
            rodata_segments.push(RodataSegmentDef {
                name: reader.string()?,
                data: reader.span(&buffer)?,
            });
        }

        let module_state = if reader.flag()? {
            Some(ModuleStateDef {
                global_bytes_capacity: reader.u32()?,
                global_ref_count: reader.u32()?,
            })
        } else {
            None
        };

        Ok(ModuleDef {
            name,
            imported_functions,
            exported_functions,
            internal_functions,
            function_descriptors,
            bytecode_data,
            rodata_segments,
            module_state,
        })
    }
}

/// Returns true if `buffer` starts with a recognizable module header.
pub fn has_module_identifier(buffer: &[u8]) -> bool {
    buffer.len() >= HEADER_SIZE && buffer[4..8] == MODULE_IDENTIFIER
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_bytes(out, value.as_bytes());
}

fn write_types(out: &mut Vec<u8>, types: &[ValueType]) {
    out.extend_from_slice(&(types.len() as u16).to_le_bytes());
    out.extend(types.iter().map(|t| t.to_u8()));
}

fn write_opt_signature(out: &mut Vec<u8>, signature: Option<&FunctionSignature>) {
    match signature {
        Some(signature) => {
            out.push(1);
            write_types(out, &signature.argument_types);
            write_types(out, &signature.result_types);
        }
        None => out.push(0),
    }
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn truncated(&self, what: &str) -> VmError {
        VmError::invalid_argument(format!("module truncated reading {} at byte {}", what, self.pos))
    }

    fn take(&mut self, len: usize) -> VmResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.truncated("bytes"));
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> VmResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> VmResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> VmResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn flag(&mut self) -> VmResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(VmError::invalid_argument(format!(
                "invalid presence tag {} at byte {}",
                other,
                self.pos - 1
            ))),
        }
    }

    /// Read an element count, rejecting counts that cannot fit in the rest
    /// of the payload at `min_element_size` bytes each.
    fn count(&mut self, min_element_size: usize) -> VmResult<usize> {
        let count = self.u32()? as usize;
        match count.checked_mul(min_element_size) {
            Some(needed) if needed <= self.remaining() => Ok(count),
            _ => Err(VmError::invalid_argument(format!(
                "table of {} entries exceeds the module payload",
                count
            ))),
        }
    }

    fn string(&mut self) -> VmResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| VmError::invalid_argument("module string is not valid UTF-8"))
    }

    /// Length-prefixed bytes as a span into `buffer`.
    fn span(&mut self, buffer: &Arc<[u8]>) -> VmResult<ByteSpan> {
        let len = self.u32()? as usize;
        let start = self.pos;
        self.take(len)?;
        ByteSpan::from_range(Arc::clone(buffer), start..start + len)
            .ok_or_else(|| self.truncated("data"))
    }

    fn types(&mut self) -> VmResult<Vec<ValueType>> {
        let count = self.u16()? as usize;
        self.take(count)?
            .iter()
            .map(|code| {
                ValueType::from_u8(*code).ok_or_else(|| {
                    VmError::invalid_argument(format!("unknown value type code {}", code))
                })
            })
            .collect()
    }

    fn opt_signature(&mut self) -> VmResult<Option<FunctionSignature>> {
        if !self.flag()? {
            return Ok(None);
        }
        let argument_types = self.types()?;
        let result_types = self.types()?;
        Ok(Some(FunctionSignature::new(argument_types, result_types)))
    }
}
