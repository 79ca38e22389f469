//! Call frames and their register banks

use arrayvec::ArrayVec;

use bytecode_system::{
    FunctionSignature, RegisterLayout, RegisterList, RegisterOperand, ValueType,
    I32_REGISTER_COUNT, REF_REGISTER_COUNT,
};
use core_types::{VmError, VmResult};
use memory_manager::{assign_ref, VmRef};

use crate::module::{FunctionRef, Linkage};
use crate::module_state::ModuleStateRef;
use crate::value::Value;

/// Fixed-capacity i32 and reference register files of one frame.
///
/// Each file holds exactly the number of registers the function declared;
/// any index beyond that is a fault.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    i32_registers: ArrayVec<i32, I32_REGISTER_COUNT>,
    ref_registers: ArrayVec<Option<VmRef>, REF_REGISTER_COUNT>,
}

impl RegisterBank {
    /// Create a zeroed bank for `layout`.
    ///
    /// Fails with `InvalidArgument` if the layout exceeds the machine limits.
    pub fn new(layout: RegisterLayout) -> VmResult<Self> {
        if !layout.fits_machine() {
            return Err(VmError::invalid_argument(format!(
                "register layout {}x i32, {}x ref exceeds the register files",
                layout.i32_count, layout.ref_count
            )));
        }
        let mut bank = Self::default();
        bank.i32_registers
            .extend(std::iter::repeat(0).take(layout.i32_count as usize));
        bank.ref_registers
            .extend(std::iter::repeat_with(|| None).take(layout.ref_count as usize));
        Ok(bank)
    }

    /// Declared register counts.
    pub fn layout(&self) -> RegisterLayout {
        RegisterLayout::new(
            self.i32_registers.len() as u16,
            self.ref_registers.len() as u16,
        )
    }

    /// The i32 register file.
    pub fn i32_registers(&self) -> &[i32] {
        &self.i32_registers
    }

    /// The reference register file.
    pub fn ref_registers(&self) -> &[Option<VmRef>] {
        &self.ref_registers
    }

    /// Read i32 register `index`.
    pub fn i32(&self, index: u16) -> VmResult<i32> {
        self.i32_registers
            .get(index as usize)
            .copied()
            .ok_or_else(|| range_fault("i32", index, self.i32_registers.len()))
    }

    /// Write i32 register `index`.
    pub fn set_i32(&mut self, index: u16, value: i32) -> VmResult<()> {
        let count = self.i32_registers.len();
        let slot = self
            .i32_registers
            .get_mut(index as usize)
            .ok_or_else(|| range_fault("i32", index, count))?;
        *slot = value;
        Ok(())
    }

    /// Borrow ref register `index`.
    pub fn ref_slot(&self, index: u16) -> VmResult<&Option<VmRef>> {
        self.ref_registers
            .get(index as usize)
            .ok_or_else(|| range_fault("ref", index, self.ref_registers.len()))
    }

    /// Retain and return the object in ref register `index`.
    pub fn get_ref(&self, index: u16) -> VmResult<Option<VmRef>> {
        self.ref_slot(index).cloned()
    }

    /// Move `value` into ref register `index`, releasing the old object.
    pub fn put_ref(&mut self, index: u16, value: Option<VmRef>) -> VmResult<()> {
        *self.ref_slot_mut(index)? = value;
        Ok(())
    }

    /// Store a retained copy of `value` into ref register `index`.
    pub fn set_ref(&mut self, index: u16, value: Option<&VmRef>) -> VmResult<()> {
        assign_ref(self.ref_slot_mut(index)?, value);
        Ok(())
    }

    /// Read the register named by a list entry.
    pub fn read(&self, operand: RegisterOperand) -> VmResult<Value> {
        if operand.is_ref {
            Ok(Value::Ref(self.get_ref(operand.index)?))
        } else {
            Ok(Value::I32(self.i32(operand.index)?))
        }
    }

    /// Read every register of a list.
    pub fn read_list(&self, operands: &RegisterList) -> VmResult<Vec<Value>> {
        operands.iter().map(|op| self.read(*op)).collect()
    }

    /// Write `value` to the register named by a list entry.
    ///
    /// Faults if the value's type does not match the register class.
    pub fn write(&mut self, operand: RegisterOperand, value: Value) -> VmResult<()> {
        match (operand.is_ref, value) {
            (false, Value::I32(v)) => self.set_i32(operand.index, v),
            (true, Value::Ref(r)) => self.put_ref(operand.index, r),
            (is_ref, value) => Err(VmError::fault(format!(
                "cannot write {:?} value to {} register {}",
                value.value_type(),
                if is_ref { "ref" } else { "i32" },
                operand.index
            ))),
        }
    }

    /// Place call arguments in the leading registers of each class.
    ///
    /// The n-th i32 argument lands in i32 register n and the n-th ref
    /// argument in ref register n.
    pub fn bind_arguments(&mut self, signature: &FunctionSignature, args: Vec<Value>) -> VmResult<()> {
        check_values(&signature.argument_types, &args, "argument")?;
        let (mut next_i32, mut next_ref) = (0u16, 0u16);
        for value in args {
            match value {
                Value::I32(v) => {
                    self.set_i32(next_i32, v)?;
                    next_i32 += 1;
                }
                Value::Ref(r) => {
                    self.put_ref(next_ref, r)?;
                    next_ref += 1;
                }
            }
        }
        Ok(())
    }

    /// Read call arguments back from the leading registers.
    pub fn arguments(&self, signature: &FunctionSignature) -> VmResult<Vec<Value>> {
        let (mut next_i32, mut next_ref) = (0u16, 0u16);
        signature
            .argument_types
            .iter()
            .map(|ty| match ty {
                ValueType::I32 => {
                    next_i32 += 1;
                    self.i32(next_i32 - 1).map(Value::I32)
                }
                ValueType::Ref => {
                    next_ref += 1;
                    self.get_ref(next_ref - 1).map(Value::Ref)
                }
            })
            .collect()
    }

    fn ref_slot_mut(&mut self, index: u16) -> VmResult<&mut Option<VmRef>> {
        let count = self.ref_registers.len();
        self.ref_registers
            .get_mut(index as usize)
            .ok_or_else(|| range_fault("ref", index, count))
    }
}

fn range_fault(class: &str, index: u16, count: usize) -> VmError {
    VmError::fault(format!(
        "{} register {} out of range ({} declared)",
        class, index, count
    ))
}

/// Fault unless `values` match `types` one for one.
pub(crate) fn check_values(types: &[ValueType], values: &[Value], what: &str) -> VmResult<()> {
    if types.len() != values.len() {
        return Err(VmError::fault(format!(
            "expected {} {}s, got {}",
            types.len(),
            what,
            values.len()
        )));
    }
    for (i, (ty, value)) in types.iter().zip(values).enumerate() {
        if value.value_type() != *ty {
            return Err(VmError::fault(format!(
                "{} {} has type {:?}, expected {:?}",
                what,
                i,
                value.value_type(),
                ty
            )));
        }
    }
    Ok(())
}

/// Fault unless the registers of `list` have the classes of `types`.
pub(crate) fn check_register_classes(types: &[ValueType], list: &RegisterList, what: &str) -> VmResult<()> {
    if types.len() != list.len() {
        return Err(VmError::fault(format!(
            "{} list has {} registers, signature has {}",
            what,
            list.len(),
            types.len()
        )));
    }
    for (i, (ty, op)) in types.iter().zip(list).enumerate() {
        if op.is_ref != (*ty == ValueType::Ref) {
            return Err(VmError::fault(format!(
                "{} register {} has the wrong class for {:?}",
                what, i, ty
            )));
        }
    }
    Ok(())
}

/// One activation of an internal function.
///
/// A frame is the complete continuation of a suspended call: resuming runs
/// from `offset` with the register bank exactly as it was left.
#[derive(Debug)]
pub struct Frame {
    pub(crate) function: FunctionRef,
    pub(crate) state: ModuleStateRef,
    pub(crate) registers: RegisterBank,
    pub(crate) offset: usize,
    pub(crate) pending_results: Option<RegisterList>,
}

impl Frame {
    /// Create a frame for an internal-linkage `function`.
    pub fn new(function: FunctionRef, state: ModuleStateRef, layout: RegisterLayout) -> VmResult<Self> {
        if function.linkage != Linkage::Internal {
            return Err(VmError::invalid_argument(format!(
                "frames require internal linkage, got {}",
                function.linkage
            )));
        }
        Ok(Self {
            function,
            state,
            registers: RegisterBank::new(layout)?,
            offset: 0,
            pending_results: None,
        })
    }

    /// Function being executed.
    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    /// Module state used by this frame.
    pub fn state(&self) -> &ModuleStateRef {
        &self.state
    }

    /// Register bank.
    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    /// Mutable register bank.
    pub fn registers_mut(&mut self) -> &mut RegisterBank {
        &mut self.registers
    }

    /// Resume offset within the function body.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Short description, `module.function@offset`.
    pub fn describe(&self) -> String {
        let module = &self.function.module;
        let name = module
            .get_function(Linkage::Internal, self.function.ordinal)
            .ok()
            .map(|info| info.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("#{}", self.function.ordinal));
        format!("{}.{}@{}", module.name(), name, self.offset)
    }
}
