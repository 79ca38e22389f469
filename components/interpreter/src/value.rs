//! Values passed across call boundaries.

use bytecode_system::ValueType;
use memory_manager::VmRef;

/// An argument or result value.
///
/// `Ref(None)` is the null reference.
#[derive(Debug, Clone)]
pub enum Value {
    /// 32-bit integer
    I32(i32),
    /// Counted object handle or null
    Ref(Option<VmRef>),
}

impl Value {
    /// The null reference.
    pub fn null() -> Self {
        Value::Ref(None)
    }

    /// Type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    /// Integer payload, if any.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            Value::Ref(_) => None,
        }
    }

    /// Object handle, if this is a non-null reference.
    pub fn as_vm_ref(&self) -> Option<&VmRef> {
        match self {
            Value::Ref(r) => r.as_ref(),
            Value::I32(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::Ref(None), Value::Ref(None)) => true,
            (Value::Ref(Some(a)), Value::Ref(Some(b))) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<VmRef> for Value {
    fn from(value: VmRef) -> Self {
        Value::Ref(Some(value))
    }
}
