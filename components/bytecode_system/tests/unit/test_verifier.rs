//! Tests for module verification

use bytecode_system::{
    verify, ExportDef, FunctionDescriptor, FunctionSignature, ImportDef, InternalFunctionDef,
    ModuleDef, ModuleStateDef, ValueType, I32_REGISTER_COUNT, MAX_GLOBAL_BYTES, MAX_GLOBAL_REFS,
    REF_REGISTER_COUNT,
};
use core_types::{ByteSpan, ErrorKind};

fn main_signature() -> FunctionSignature {
    FunctionSignature::new(vec![ValueType::I32], vec![ValueType::I32])
}

/// One export "main" -> internal 0, one 4-byte function with 2 i32 registers.
fn scenario_module() -> ModuleDef {
    ModuleDef {
        name: "scenario".to_string(),
        imported_functions: vec![],
        exported_functions: vec![ExportDef {
            local_name: "main".to_string(),
            signature: Some(main_signature()),
            internal_ordinal: 0,
        }],
        internal_functions: vec![InternalFunctionDef {
            local_name: "main".to_string(),
            signature: Some(main_signature()),
            debug_label: None,
        }],
        function_descriptors: Some(vec![FunctionDescriptor {
            bytecode_offset: 0,
            bytecode_length: 4,
            i32_register_count: 2,
            ref_register_count: 0,
        }]),
        bytecode_data: Some(ByteSpan::from(vec![0x52, 0x00, 0x00, 0x00])),
        rodata_segments: vec![],
        module_state: None,
    }
}

fn assert_rejected(def: &ModuleDef, needle: &str) {
    let err = verify(def).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(
        err.message.contains(needle),
        "expected {:?} in {:?}",
        needle,
        err.message
    );
}

#[test]
fn test_scenario_module_passes() {
    verify(&scenario_module()).unwrap();
}

#[test]
fn test_zero_descriptors_rejected() {
    let mut def = scenario_module();
    def.function_descriptors = Some(vec![]);
    assert_rejected(&def, "descriptors");
}

#[test]
fn test_missing_required_fields_rejected() {
    let mut def = scenario_module();
    def.name.clear();
    assert_rejected(&def, "name");

    let mut def = scenario_module();
    def.exported_functions.clear();
    assert_rejected(&def, "export");

    let mut def = scenario_module();
    def.internal_functions.clear();
    assert_rejected(&def, "internal");

    let mut def = scenario_module();
    def.function_descriptors = None;
    assert_rejected(&def, "descriptors");

    let mut def = scenario_module();
    def.bytecode_data = None;
    assert_rejected(&def, "bytecode");
}

#[test]
fn test_first_failing_check_wins() {
    let mut def = scenario_module();
    def.name.clear();
    def.function_descriptors = None;
    def.bytecode_data = None;
    assert_rejected(&def, "module name is empty");
}

#[test]
fn test_descriptor_range_boundary() {
    let mut def = scenario_module();
    def.function_descriptors = Some(vec![FunctionDescriptor {
        bytecode_offset: 1,
        bytecode_length: 3,
        i32_register_count: 2,
        ref_register_count: 0,
    }]);
    verify(&def).unwrap();

    def.function_descriptors = Some(vec![FunctionDescriptor {
        bytecode_offset: 1,
        bytecode_length: 4,
        i32_register_count: 2,
        ref_register_count: 0,
    }]);
    assert_rejected(&def, "outside");
}

#[test]
fn test_negative_and_overflowing_ranges_rejected() {
    for (offset, length) in [(-1, 1), (0, -1), (i32::MAX, i32::MAX)] {
        let mut def = scenario_module();
        def.function_descriptors = Some(vec![FunctionDescriptor {
            bytecode_offset: offset,
            bytecode_length: length,
            i32_register_count: 0,
            ref_register_count: 0,
        }]);
        assert_rejected(&def, "outside");
    }
}

#[test]
fn test_register_limits() {
    let mut def = scenario_module();
    if let Some(descriptors) = def.function_descriptors.as_mut() {
        descriptors[0].i32_register_count = I32_REGISTER_COUNT as u16;
        descriptors[0].ref_register_count = REF_REGISTER_COUNT as u16;
    }
    verify(&def).unwrap();

    if let Some(descriptors) = def.function_descriptors.as_mut() {
        descriptors[0].ref_register_count = REF_REGISTER_COUNT as u16 + 1;
    }
    assert_rejected(&def, "registers");
}

#[test]
fn test_import_checks() {
    let mut def = scenario_module();
    def.imported_functions.push(ImportDef {
        full_name: String::new(),
        signature: Some(FunctionSignature::default()),
    });
    assert_rejected(&def, "import 0 has no name");

    def.imported_functions[0].full_name = "host.log".to_string();
    def.imported_functions[0].signature = None;
    assert_rejected(&def, "no signature");

    def.imported_functions[0].signature = Some(FunctionSignature::default());
    verify(&def).unwrap();
}

#[test]
fn test_export_checks() {
    let mut def = scenario_module();
    def.exported_functions[0].internal_ordinal = 1;
    assert_rejected(&def, "references internal function");

    def.exported_functions[0].internal_ordinal = -1;
    assert_rejected(&def, "references internal function");

    let mut def = scenario_module();
    def.exported_functions[0].signature = None;
    assert_rejected(&def, "no signature");

    let mut def = scenario_module();
    def.exported_functions[0].local_name.clear();
    assert_rejected(&def, "has no name");
}

#[test]
fn test_internal_signature_required() {
    let mut def = scenario_module();
    def.internal_functions[0].signature = None;
    assert_rejected(&def, "internal function 0 has no signature");
}

#[test]
fn test_unnamed_internal_function_allowed() {
    let mut def = scenario_module();
    def.internal_functions[0].local_name.clear();
    verify(&def).unwrap();
}

#[test]
fn test_module_state_limits() {
    let mut def = scenario_module();
    def.module_state = Some(ModuleStateDef {
        global_bytes_capacity: MAX_GLOBAL_BYTES,
        global_ref_count: MAX_GLOBAL_REFS,
    });
    verify(&def).unwrap();

    def.module_state = Some(ModuleStateDef {
        global_bytes_capacity: MAX_GLOBAL_BYTES + 1,
        global_ref_count: 0,
    });
    assert_rejected(&def, "global bytes");

    def.module_state = Some(ModuleStateDef {
        global_bytes_capacity: 0,
        global_ref_count: MAX_GLOBAL_REFS + 1,
    });
    assert_rejected(&def, "global refs");
}
