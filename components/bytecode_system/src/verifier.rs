//! Structural verification of module definitions.
//!
//! Checks run in a fixed order and stop at the first failure, so a module
//! with several defects always reports the same one.

use core_types::{VmError, VmResult};

use crate::module_def::{
    ModuleDef, I32_REGISTER_COUNT, MAX_GLOBAL_BYTES, MAX_GLOBAL_REFS, REF_REGISTER_COUNT,
};

/// Verify that `def` is safe to instantiate.
///
/// Every failure is `InvalidArgument`. A definition that passes may still
/// contain bytecode that faults at run time; instruction streams are checked
/// during dispatch.
pub fn verify(def: &ModuleDef) -> VmResult<()> {
    if def.name.is_empty() {
        return Err(VmError::invalid_argument("module name is empty"));
    }

    if def.exported_functions.is_empty() || def.internal_functions.is_empty() {
        return Err(VmError::invalid_argument(format!(
            "module {} needs at least one export and one internal function ({} exports, {} internal)",
            def.name,
            def.exported_functions.len(),
            def.internal_functions.len()
        )));
    }

    let descriptors = def.function_descriptors.as_deref().unwrap_or(&[]);
    if descriptors.len() != def.internal_functions.len() {
        return Err(VmError::invalid_argument(format!(
            "{} function descriptors for {} internal functions",
            descriptors.len(),
            def.internal_functions.len()
        )));
    }

    let blob_len = match &def.bytecode_data {
        Some(bytecode) => bytecode.len(),
        None => return Err(VmError::invalid_argument("bytecode data is missing")),
    };

    for (i, import) in def.imported_functions.iter().enumerate() {
        if import.full_name.is_empty() {
            return Err(VmError::invalid_argument(format!("import {} has no name", i)));
        }
        if import.signature.is_none() {
            return Err(VmError::invalid_argument(format!(
                "import {} ({}) has no signature",
                i, import.full_name
            )));
        }
    }

    for (i, export) in def.exported_functions.iter().enumerate() {
        if export.local_name.is_empty() {
            return Err(VmError::invalid_argument(format!("export {} has no name", i)));
        }
        if export.signature.is_none() {
            return Err(VmError::invalid_argument(format!(
                "export {} ({}) has no signature",
                i, export.local_name
            )));
        }
        let in_range = usize::try_from(export.internal_ordinal)
            .map(|ordinal| ordinal < def.internal_functions.len())
            .unwrap_or(false);
        if !in_range {
            return Err(VmError::invalid_argument(format!(
                "export {} ({}) references internal function {} of {}",
                i,
                export.local_name,
                export.internal_ordinal,
                def.internal_functions.len()
            )));
        }
    }

    for (i, (function, descriptor)) in def.internal_functions.iter().zip(descriptors).enumerate() {
        if function.signature.is_none() {
            return Err(VmError::invalid_argument(format!(
                "internal function {} has no signature",
                i
            )));
        }
        if descriptor.byte_range(blob_len).is_none() {
            return Err(VmError::invalid_argument(format!(
                "function {} bytecode range [{}, +{}) lies outside the {} byte blob",
                i,
                descriptor.bytecode_offset,
                descriptor.bytecode_length,
                blob_len
            )));
        }
        if descriptor.i32_register_count as usize > I32_REGISTER_COUNT
            || descriptor.ref_register_count as usize > REF_REGISTER_COUNT
        {
            return Err(VmError::invalid_argument(format!(
                "function {} needs {} i32 and {} ref registers (limits {} and {})",
                i,
                descriptor.i32_register_count,
                descriptor.ref_register_count,
                I32_REGISTER_COUNT,
                REF_REGISTER_COUNT
            )));
        }
    }

    let state = def.state_def();
    if state.global_bytes_capacity > MAX_GLOBAL_BYTES {
        return Err(VmError::invalid_argument(format!(
            "module declares {} global bytes (limit {})",
            state.global_bytes_capacity, MAX_GLOBAL_BYTES
        )));
    }
    if state.global_ref_count > MAX_GLOBAL_REFS {
        return Err(VmError::invalid_argument(format!(
            "module declares {} global refs (limit {})",
            state.global_ref_count, MAX_GLOBAL_REFS
        )));
    }

    Ok(())
}
