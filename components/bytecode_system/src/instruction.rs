//! Decoded instructions and their binary encoding
//!
//! Operands follow the opcode byte in declaration order. Register operands
//! are `u16` indices; register lists are a `u8` count followed by `u16`
//! entries whose top bit selects the ref register file.

use arrayvec::ArrayVec;
use core_types::{VmError, VmResult, WaitMode};

use crate::opcode::Opcode;

/// Maximum entries in a register list.
pub const MAX_REGISTER_LIST: usize = 32;

/// Bit marking a ref register inside a register list entry.
pub const REF_REGISTER_FLAG: u16 = 0x8000;

/// A register named in a register list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterOperand {
    /// Index within its register file
    pub index: u16,
    /// True for the ref register file
    pub is_ref: bool,
}

impl RegisterOperand {
    /// An i32 register.
    pub fn i32(index: u16) -> Self {
        Self {
            index,
            is_ref: false,
        }
    }

    /// A ref register.
    pub fn reference(index: u16) -> Self {
        Self {
            index,
            is_ref: true,
        }
    }

    fn encode(self) -> u16 {
        if self.is_ref {
            self.index | REF_REGISTER_FLAG
        } else {
            self.index
        }
    }

    fn decode(raw: u16) -> Self {
        Self {
            index: raw & !REF_REGISTER_FLAG,
            is_ref: raw & REF_REGISTER_FLAG != 0,
        }
    }
}

/// Argument, result and wait-handle lists.
pub type RegisterList = ArrayVec<RegisterOperand, MAX_REGISTER_LIST>;

/// Build a register list from a slice, keeping at most
/// [`MAX_REGISTER_LIST`] entries.
pub fn register_list(registers: &[RegisterOperand]) -> RegisterList {
    registers.iter().copied().take(MAX_REGISTER_LIST).collect()
}

/// Two-operand i32 arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Wrapping add
    Add,
    /// Wrapping subtract
    Sub,
    /// Wrapping multiply
    Mul,
    /// Signed divide
    DivS,
    /// Signed remainder
    RemS,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Arithmetic shift right
    ShrS,
}

impl BinaryOp {
    fn from_opcode(opcode: Opcode) -> Option<Self> {
        let op = match opcode {
            Opcode::AddI32 => BinaryOp::Add,
            Opcode::SubI32 => BinaryOp::Sub,
            Opcode::MulI32 => BinaryOp::Mul,
            Opcode::DivSI32 => BinaryOp::DivS,
            Opcode::RemSI32 => BinaryOp::RemS,
            Opcode::AndI32 => BinaryOp::And,
            Opcode::OrI32 => BinaryOp::Or,
            Opcode::XorI32 => BinaryOp::Xor,
            Opcode::ShlI32 => BinaryOp::Shl,
            Opcode::ShrSI32 => BinaryOp::ShrS,
            _ => return None,
        };
        Some(op)
    }

    /// Opcode encoding this operation.
    pub fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::AddI32,
            BinaryOp::Sub => Opcode::SubI32,
            BinaryOp::Mul => Opcode::MulI32,
            BinaryOp::DivS => Opcode::DivSI32,
            BinaryOp::RemS => Opcode::RemSI32,
            BinaryOp::And => Opcode::AndI32,
            BinaryOp::Or => Opcode::OrI32,
            BinaryOp::Xor => Opcode::XorI32,
            BinaryOp::Shl => Opcode::ShlI32,
            BinaryOp::ShrS => Opcode::ShrSI32,
        }
    }

    /// Evaluate; `None` on division by zero.
    pub fn apply(self, lhs: i32, rhs: i32) -> Option<i32> {
        let value = match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::DivS => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
            BinaryOp::RemS => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_rem(rhs)
            }
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::Shl => lhs.wrapping_shl(rhs as u32 & 31),
            BinaryOp::ShrS => lhs.wrapping_shr(rhs as u32 & 31),
        };
        Some(value)
    }
}

/// i32 comparisons producing 1 or 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Signed less-than
    LtS,
}

impl CompareOp {
    fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::CmpEqI32 => Some(CompareOp::Eq),
            Opcode::CmpNeI32 => Some(CompareOp::Ne),
            Opcode::CmpLtSI32 => Some(CompareOp::LtS),
            _ => None,
        }
    }

    /// Opcode encoding this comparison.
    pub fn opcode(self) -> Opcode {
        match self {
            CompareOp::Eq => Opcode::CmpEqI32,
            CompareOp::Ne => Opcode::CmpNeI32,
            CompareOp::LtS => Opcode::CmpLtSI32,
        }
    }

    /// Evaluate.
    pub fn apply(self, lhs: i32, rhs: i32) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::LtS => lhs < rhs,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Instruction {
    ConstI32 { value: i32, dst: u16 },
    ConstI32Zero { dst: u16 },
    ConstRefZero { dst: u16 },
    ConstRefRodata { rodata: u32, dst: u16 },
    MovI32 { src: u16, dst: u16 },
    MovRef { src: u16, dst: u16 },
    GlobalLoadI32 { offset: u32, dst: u16 },
    GlobalStoreI32 { offset: u32, src: u16 },
    GlobalLoadRef { global: u32, dst: u16 },
    GlobalStoreRef { global: u32, src: u16 },
    GlobalResetRef { global: u32 },
    SelectI32 { cond: u16, if_true: u16, if_false: u16, dst: u16 },
    Binary { op: BinaryOp, lhs: u16, rhs: u16, dst: u16 },
    NotI32 { src: u16, dst: u16 },
    Compare { op: CompareOp, lhs: u16, rhs: u16, dst: u16 },
    CmpNzI32 { src: u16, dst: u16 },
    CmpNzRef { src: u16, dst: u16 },
    Branch { target: u32 },
    CondBranch { cond: u16, true_target: u32, false_target: u32 },
    Call { function: u32, args: RegisterList, results: RegisterList },
    CallImport { import: u32, args: RegisterList, results: RegisterList },
    Return { results: RegisterList },
    Yield,
    Await { mode: WaitMode, handles: RegisterList },
    Fail { code: u16 },
}

impl Instruction {
    /// `return` with the given result registers.
    pub fn ret(results: &[RegisterOperand]) -> Self {
        Instruction::Return {
            results: register_list(results),
        }
    }

    /// `call` of internal function `function`.
    pub fn call(function: u32, args: &[RegisterOperand], results: &[RegisterOperand]) -> Self {
        Instruction::Call {
            function,
            args: register_list(args),
            results: register_list(results),
        }
    }

    /// `call.import` of import `import`.
    pub fn call_import(import: u32, args: &[RegisterOperand], results: &[RegisterOperand]) -> Self {
        Instruction::CallImport {
            import,
            args: register_list(args),
            results: register_list(results),
        }
    }

    /// `await` on the handles held in the given ref registers.
    pub fn await_handles(mode: WaitMode, handles: &[u16]) -> Self {
        let handles: Vec<_> = handles.iter().map(|r| RegisterOperand::reference(*r)).collect();
        Instruction::Await {
            mode,
            handles: register_list(&handles),
        }
    }

    /// Opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::ConstI32 { .. } => Opcode::ConstI32,
            Instruction::ConstI32Zero { .. } => Opcode::ConstI32Zero,
            Instruction::ConstRefZero { .. } => Opcode::ConstRefZero,
            Instruction::ConstRefRodata { .. } => Opcode::ConstRefRodata,
            Instruction::MovI32 { .. } => Opcode::MovI32,
            Instruction::MovRef { .. } => Opcode::MovRef,
            Instruction::GlobalLoadI32 { .. } => Opcode::GlobalLoadI32,
            Instruction::GlobalStoreI32 { .. } => Opcode::GlobalStoreI32,
            Instruction::GlobalLoadRef { .. } => Opcode::GlobalLoadRef,
            Instruction::GlobalStoreRef { .. } => Opcode::GlobalStoreRef,
            Instruction::GlobalResetRef { .. } => Opcode::GlobalResetRef,
            Instruction::SelectI32 { .. } => Opcode::SelectI32,
            Instruction::Binary { op, .. } => op.opcode(),
            Instruction::NotI32 { .. } => Opcode::NotI32,
            Instruction::Compare { op, .. } => op.opcode(),
            Instruction::CmpNzI32 { .. } => Opcode::CmpNzI32,
            Instruction::CmpNzRef { .. } => Opcode::CmpNzRef,
            Instruction::Branch { .. } => Opcode::Branch,
            Instruction::CondBranch { .. } => Opcode::CondBranch,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::CallImport { .. } => Opcode::CallImport,
            Instruction::Return { .. } => Opcode::Return,
            Instruction::Yield => Opcode::Yield,
            Instruction::Await { .. } => Opcode::Await,
            Instruction::Fail { .. } => Opcode::Fail,
        }
    }

    /// Append the binary encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_u8());
        let reg = |out: &mut Vec<u8>, r: u16| out.extend_from_slice(&r.to_le_bytes());
        let word = |out: &mut Vec<u8>, w: u32| out.extend_from_slice(&w.to_le_bytes());
        let list = |out: &mut Vec<u8>, l: &RegisterList| {
            out.push(l.len() as u8);
            for r in l {
                out.extend_from_slice(&r.encode().to_le_bytes());
            }
        };
        match self {
            Instruction::ConstI32 { value, dst } => {
                out.extend_from_slice(&value.to_le_bytes());
                reg(out, *dst);
            }
            Instruction::ConstI32Zero { dst } | Instruction::ConstRefZero { dst } => reg(out, *dst),
            Instruction::ConstRefRodata { rodata, dst } => {
                word(out, *rodata);
                reg(out, *dst);
            }
            Instruction::MovI32 { src, dst }
            | Instruction::MovRef { src, dst }
            | Instruction::NotI32 { src, dst }
            | Instruction::CmpNzI32 { src, dst }
            | Instruction::CmpNzRef { src, dst } => {
                reg(out, *src);
                reg(out, *dst);
            }
            Instruction::GlobalLoadI32 { offset, dst } => {
                word(out, *offset);
                reg(out, *dst);
            }
            Instruction::GlobalStoreI32 { offset, src } => {
                word(out, *offset);
                reg(out, *src);
            }
            Instruction::GlobalLoadRef { global, dst } => {
                word(out, *global);
                reg(out, *dst);
            }
            Instruction::GlobalStoreRef { global, src } => {
                word(out, *global);
                reg(out, *src);
            }
            Instruction::GlobalResetRef { global } => word(out, *global),
            Instruction::SelectI32 {
                cond,
                if_true,
                if_false,
                dst,
            } => {
                for r in [cond, if_true, if_false, dst] {
                    reg(out, *r);
                }
            }
            Instruction::Binary { lhs, rhs, dst, .. } | Instruction::Compare { lhs, rhs, dst, .. } => {
                for r in [lhs, rhs, dst] {
                    reg(out, *r);
                }
            }
            Instruction::Branch { target } => word(out, *target),
            Instruction::CondBranch {
                cond,
                true_target,
                false_target,
            } => {
                reg(out, *cond);
                word(out, *true_target);
                word(out, *false_target);
            }
            Instruction::Call {
                function: ordinal,
                args,
                results,
            }
            | Instruction::CallImport {
                import: ordinal,
                args,
                results,
            } => {
                word(out, *ordinal);
                list(out, args);
                list(out, results);
            }
            Instruction::Return { results } => list(out, results),
            Instruction::Yield => {}
            Instruction::Await { mode, handles } => {
                out.push(mode.to_u8());
                list(out, handles);
            }
            Instruction::Fail { code } => reg(out, *code),
        }
    }

    /// Decode the instruction at `pc` in `code`.
    ///
    /// Returns the instruction and the offset of the next one. Unknown
    /// opcodes and truncated operands are faults.
    pub fn decode(code: &[u8], pc: usize) -> VmResult<(Instruction, usize)> {
        let mut cursor = Cursor { code, pos: pc };
        let byte = cursor.u8()?;
        let opcode = Opcode::from_u8(byte)
            .ok_or_else(|| VmError::fault(format!("unknown opcode {:#04x} at offset {}", byte, pc)))?;

        let instruction = match opcode {
            Opcode::ConstI32 => Instruction::ConstI32 {
                value: cursor.i32()?,
                dst: cursor.u16()?,
            },
            Opcode::ConstI32Zero => Instruction::ConstI32Zero { dst: cursor.u16()? },
            Opcode::ConstRefZero => Instruction::ConstRefZero { dst: cursor.u16()? },
            Opcode::ConstRefRodata => Instruction::ConstRefRodata {
                rodata: cursor.u32()?,
                dst: cursor.u16()?,
            },
            Opcode::MovI32 => Instruction::MovI32 {
                src: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::MovRef => Instruction::MovRef {
                src: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::GlobalLoadI32 => Instruction::GlobalLoadI32 {
                offset: cursor.u32()?,
                dst: cursor.u16()?,
            },
            Opcode::GlobalStoreI32 => Instruction::GlobalStoreI32 {
                offset: cursor.u32()?,
                src: cursor.u16()?,
            },
            Opcode::GlobalLoadRef => Instruction::GlobalLoadRef {
                global: cursor.u32()?,
                dst: cursor.u16()?,
            },
            Opcode::GlobalStoreRef => Instruction::GlobalStoreRef {
                global: cursor.u32()?,
                src: cursor.u16()?,
            },
            Opcode::GlobalResetRef => Instruction::GlobalResetRef {
                global: cursor.u32()?,
            },
            Opcode::SelectI32 => Instruction::SelectI32 {
                cond: cursor.u16()?,
                if_true: cursor.u16()?,
                if_false: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::NotI32 => Instruction::NotI32 {
                src: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::CmpNzI32 => Instruction::CmpNzI32 {
                src: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::CmpNzRef => Instruction::CmpNzRef {
                src: cursor.u16()?,
                dst: cursor.u16()?,
            },
            Opcode::Branch => Instruction::Branch {
                target: cursor.u32()?,
            },
            Opcode::CondBranch => Instruction::CondBranch {
                cond: cursor.u16()?,
                true_target: cursor.u32()?,
                false_target: cursor.u32()?,
            },
            Opcode::Call => Instruction::Call {
                function: cursor.u32()?,
                args: cursor.list()?,
                results: cursor.list()?,
            },
            Opcode::CallImport => Instruction::CallImport {
                import: cursor.u32()?,
                args: cursor.list()?,
                results: cursor.list()?,
            },
            Opcode::Return => Instruction::Return {
                results: cursor.list()?,
            },
            Opcode::Yield => Instruction::Yield,
            Opcode::Await => {
                let raw = cursor.u8()?;
                let mode = WaitMode::from_u8(raw).ok_or_else(|| {
                    VmError::fault(format!("invalid await mode {} at offset {}", raw, pc))
                })?;
                Instruction::Await {
                    mode,
                    handles: cursor.list()?,
                }
            }
            Opcode::Fail => Instruction::Fail { code: cursor.u16()? },
            other => {
                if let Some(op) = BinaryOp::from_opcode(other) {
                    Instruction::Binary {
                        op,
                        lhs: cursor.u16()?,
                        rhs: cursor.u16()?,
                        dst: cursor.u16()?,
                    }
                } else if let Some(op) = CompareOp::from_opcode(other) {
                    Instruction::Compare {
                        op,
                        lhs: cursor.u16()?,
                        rhs: cursor.u16()?,
                        dst: cursor.u16()?,
                    }
                } else {
                    return Err(VmError::fault(format!(
                        "unhandled opcode {} at offset {}",
                        other.mnemonic(),
                        pc
                    )));
                }
            }
        };
        Ok((instruction, cursor.pos))
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let end = self.pos.checked_add(N).filter(|end| *end <= self.code.len());
        match end {
            Some(end) => {
                let mut out = [0u8; N];
                out.copy_from_slice(&self.code[self.pos..end]);
                self.pos = end;
                Ok(out)
            }
            None => Err(VmError::fault(format!(
                "truncated instruction operand at offset {}",
                self.pos
            ))),
        }
    }

    fn u8(&mut self) -> VmResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> VmResult<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> VmResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn list(&mut self) -> VmResult<RegisterList> {
        let count = self.u8()? as usize;
        if count > MAX_REGISTER_LIST {
            return Err(VmError::fault(format!(
                "register list of {} entries exceeds {} at offset {}",
                count,
                MAX_REGISTER_LIST,
                self.pos - 1
            )));
        }
        let mut list = RegisterList::new();
        for _ in 0..count {
            list.push(RegisterOperand::decode(self.u16()?));
        }
        Ok(list)
    }
}
