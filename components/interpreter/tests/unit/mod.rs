//! Unit tests for the interpreter

mod common;
mod test_bytecode_module;
