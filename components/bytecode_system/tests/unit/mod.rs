//! Unit tests for bytecode_system

mod proptest_decoding;
mod test_verifier;
