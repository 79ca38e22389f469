//! Property-based tests for decoding untrusted input.
//!
//! Decoders must reject malformed input with an error and never panic or
//! read out of bounds.

use std::sync::Arc;

use bytecode_system::{Instruction, ModuleDef};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Arbitrary bytes never panic the module decoder
    #[test]
    fn module_decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = ModuleDef::from_bytes(Arc::from(bytes));
    }

    /// A valid header followed by arbitrary bytes never panics the decoder
    #[test]
    fn module_payload_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut bytes = Vec::with_capacity(16 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"BMOD");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&payload);
        if let Ok(def) = ModuleDef::from_bytes(Arc::from(bytes)) {
            let _ = bytecode_system::verify(&def);
        }
    }

    /// Decoding an instruction either fails or advances within the buffer
    #[test]
    fn instruction_decoder_stays_in_bounds(
        code in proptest::collection::vec(any::<u8>(), 1..64),
        start in 0usize..64,
    ) {
        if let Ok((_, next)) = Instruction::decode(&code, start) {
            prop_assert!(next > start);
            prop_assert!(next <= code.len());
        }
    }

    /// Immediate operands survive encoding
    #[test]
    fn const_i32_immediate_preserved(value in any::<i32>(), dst in 0u16..128) {
        let mut code = Vec::new();
        Instruction::ConstI32 { value, dst }.encode(&mut code);
        let (decoded, _) = Instruction::decode(&code, 0).unwrap();
        prop_assert_eq!(decoded, Instruction::ConstI32 { value, dst });
    }
}
