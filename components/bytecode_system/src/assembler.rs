//! Label-based assembler for function bodies.

use core_types::{VmError, VmResult};

use crate::instruction::Instruction;

/// A forward- or backward-referenced branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Byte position of the u32 target operand
    position: usize,
    label: Label,
}

/// Emits one function body, resolving labels to function-relative offsets.
///
/// # Example
///
/// ```
/// use bytecode_system::{Assembler, Instruction};
///
/// let mut asm = Assembler::new();
/// let done = asm.new_label();
/// asm.branch(done);
/// asm.emit(&Instruction::Yield);
/// asm.bind(done).unwrap();
/// asm.emit(&Instruction::ret(&[]));
/// let code = asm.finish().unwrap();
/// assert_eq!(&code[1..5], &6u32.to_le_bytes());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Allocate an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> VmResult<()> {
        let offset = self.code.len() as u32;
        let slot = self
            .labels
            .get_mut(label.0)
            .ok_or_else(|| VmError::invalid_argument(format!("unknown label {}", label.0)))?;
        if slot.is_some() {
            return Err(VmError::invalid_argument(format!(
                "label {} is already bound",
                label.0
            )));
        }
        *slot = Some(offset);
        Ok(())
    }

    /// Append an instruction.
    pub fn emit(&mut self, instruction: &Instruction) -> &mut Self {
        instruction.encode(&mut self.code);
        self
    }

    /// Append `br label`.
    pub fn branch(&mut self, label: Label) -> &mut Self {
        let start = self.code.len();
        self.emit(&Instruction::Branch { target: 0 });
        self.fixups.push(Fixup {
            position: start + 1,
            label,
        });
        self
    }

    /// Append `cond_br cond, if_true, if_false`.
    pub fn cond_branch(&mut self, cond: u16, if_true: Label, if_false: Label) -> &mut Self {
        let start = self.code.len();
        self.emit(&Instruction::CondBranch {
            cond,
            true_target: 0,
            false_target: 0,
        });
        self.fixups.push(Fixup {
            position: start + 3,
            label: if_true,
        });
        self.fixups.push(Fixup {
            position: start + 7,
            label: if_false,
        });
        self
    }

    /// Resolve labels and return the encoded body.
    ///
    /// Fails with `InvalidArgument` if a referenced label was never bound.
    pub fn finish(mut self) -> VmResult<Vec<u8>> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    VmError::invalid_argument(format!("label {} was never bound", fixup.label.0))
                })?;
            self.code[fixup.position..fixup.position + 4].copy_from_slice(&target.to_le_bytes());
        }
        Ok(self.code)
    }
}
