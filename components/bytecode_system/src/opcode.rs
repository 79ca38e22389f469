//! Bytecode opcodes for the register machine
//!
//! Each instruction starts with one opcode byte followed by fixed-width
//! little-endian operands. See [`crate::Instruction`] for operand layouts.

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Constants and moves
    /// Load an i32 immediate
    ConstI32 = 0x01,
    /// Load zero into an i32 register
    ConstI32Zero = 0x02,
    /// Clear a ref register
    ConstRefZero = 0x03,
    /// Load a rodata constant buffer reference
    ConstRefRodata = 0x04,
    /// Copy an i32 register
    MovI32 = 0x05,
    /// Copy a ref register, retaining the object
    MovRef = 0x06,

    // Globals
    /// Load an i32 from the scalar global region
    GlobalLoadI32 = 0x10,
    /// Store an i32 into the scalar global region
    GlobalStoreI32 = 0x11,
    /// Load a ref global
    GlobalLoadRef = 0x12,
    /// Store a ref global
    GlobalStoreRef = 0x13,
    /// Release a ref global
    GlobalResetRef = 0x14,

    // Arithmetic
    /// `dst = cond != 0 ? a : b`
    SelectI32 = 0x20,
    /// Wrapping add
    AddI32 = 0x21,
    /// Wrapping subtract
    SubI32 = 0x22,
    /// Wrapping multiply
    MulI32 = 0x23,
    /// Signed divide; faults on zero divisor
    DivSI32 = 0x24,
    /// Signed remainder; faults on zero divisor
    RemSI32 = 0x25,
    /// Bitwise and
    AndI32 = 0x26,
    /// Bitwise or
    OrI32 = 0x27,
    /// Bitwise xor
    XorI32 = 0x28,
    /// Shift left by the low 5 bits of rhs
    ShlI32 = 0x29,
    /// Arithmetic shift right by the low 5 bits of rhs
    ShrSI32 = 0x2A,
    /// Bitwise not
    NotI32 = 0x2B,

    // Comparison
    /// `dst = lhs == rhs`
    CmpEqI32 = 0x30,
    /// `dst = lhs != rhs`
    CmpNeI32 = 0x31,
    /// `dst = lhs < rhs` (signed)
    CmpLtSI32 = 0x32,
    /// `dst = src != 0`
    CmpNzI32 = 0x33,
    /// `dst = src is not null`
    CmpNzRef = 0x34,

    // Control flow
    /// Unconditional branch
    Branch = 0x40,
    /// Two-way conditional branch
    CondBranch = 0x41,
    /// Call an internal function
    Call = 0x50,
    /// Call an imported function
    CallImport = 0x51,
    /// Return from the current function
    Return = 0x52,
    /// Suspend and resume immediately
    Yield = 0x53,
    /// Suspend until wait handles are signaled
    Await = 0x54,
    /// Abort the stack with a fault carrying an i32 code
    Fail = 0x55,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        let opcode = match byte {
            0x01 => ConstI32,
            0x02 => ConstI32Zero,
            0x03 => ConstRefZero,
            0x04 => ConstRefRodata,
            0x05 => MovI32,
            0x06 => MovRef,
            0x10 => GlobalLoadI32,
            0x11 => GlobalStoreI32,
            0x12 => GlobalLoadRef,
            0x13 => GlobalStoreRef,
            0x14 => GlobalResetRef,
            0x20 => SelectI32,
            0x21 => AddI32,
            0x22 => SubI32,
            0x23 => MulI32,
            0x24 => DivSI32,
            0x25 => RemSI32,
            0x26 => AndI32,
            0x27 => OrI32,
            0x28 => XorI32,
            0x29 => ShlI32,
            0x2A => ShrSI32,
            0x2B => NotI32,
            0x30 => CmpEqI32,
            0x31 => CmpNeI32,
            0x32 => CmpLtSI32,
            0x33 => CmpNzI32,
            0x34 => CmpNzRef,
            0x40 => Branch,
            0x41 => CondBranch,
            0x50 => Call,
            0x51 => CallImport,
            0x52 => Return,
            0x53 => Yield,
            0x54 => Await,
            0x55 => Fail,
            _ => return None,
        };
        Some(opcode)
    }

    /// Opcode byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            ConstI32 => "const.i32",
            ConstI32Zero => "const.i32.zero",
            ConstRefZero => "const.ref.zero",
            ConstRefRodata => "const.ref.rodata",
            MovI32 => "mov.i32",
            MovRef => "mov.ref",
            GlobalLoadI32 => "global.load.i32",
            GlobalStoreI32 => "global.store.i32",
            GlobalLoadRef => "global.load.ref",
            GlobalStoreRef => "global.store.ref",
            GlobalResetRef => "global.reset.ref",
            SelectI32 => "select.i32",
            AddI32 => "add.i32",
            SubI32 => "sub.i32",
            MulI32 => "mul.i32",
            DivSI32 => "div.i32.s",
            RemSI32 => "rem.i32.s",
            AndI32 => "and.i32",
            OrI32 => "or.i32",
            XorI32 => "xor.i32",
            ShlI32 => "shl.i32",
            ShrSI32 => "shr.i32.s",
            NotI32 => "not.i32",
            CmpEqI32 => "cmp.eq.i32",
            CmpNeI32 => "cmp.ne.i32",
            CmpLtSI32 => "cmp.lt.i32.s",
            CmpNzI32 => "cmp.nz.i32",
            CmpNzRef => "cmp.nz.ref",
            Branch => "br",
            CondBranch => "cond_br",
            Call => "call",
            CallImport => "call.import",
            Return => "return",
            Yield => "yield",
            Await => "await",
            Fail => "fail",
        }
    }

    /// Returns true if control never falls through to the next instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::CondBranch | Opcode::Return | Opcode::Fail
        )
    }

    /// Returns true if the instruction may suspend the stack.
    pub fn is_suspension_point(self) -> bool {
        matches!(self, Opcode::Yield | Opcode::Await | Opcode::CallImport)
    }
}
