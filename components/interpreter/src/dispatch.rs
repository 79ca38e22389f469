//! Dispatch loop for bytecode execution
//!
//! Runs the top frame of a stack one instruction at a time. Internal calls
//! push a frame and continue in the same loop; imported calls push the
//! callee frame and enter the callee module's `execute`, so a suspension
//! inside the callee unwinds straight back to the host with every frame
//! left in place.

use std::sync::Arc;

use tracing::{debug, trace};

use bytecode_system::{Instruction, RegisterList};
use core_types::{VmError, VmResult, WaitHandle, WaitSet};

use crate::bytecode_module::BytecodeModule;
use crate::call_frame::Frame;
use crate::module::{FunctionRef, Module};
use crate::module_state::ModuleStateRef;
use crate::stack::{ExecutionResult, Stack};
use crate::value::Value;

/// What the loop does after an instruction.
enum Step {
    Next,
    Call {
        callee: FunctionRef,
        state: Option<ModuleStateRef>,
        args: Vec<Value>,
        results: RegisterList,
        nested: bool,
    },
    Return(Vec<Value>),
    Suspend(ExecutionResult),
}

fn branch_target(target: u32, code_len: usize) -> VmResult<usize> {
    let target = target as usize;
    if target >= code_len {
        return Err(VmError::fault(format!(
            "branch target {} outside function of {} bytes",
            target, code_len
        )));
    }
    Ok(target)
}

/// Execute `stack` until the chain returns or suspends.
///
/// Inside a nested cross-module call the loop returns once the callee entry
/// frame pops. At host level it keeps running caller frames of this module,
/// and hands the chain to the owning module when a caller belongs to
/// another one.
pub(crate) fn run(module: &BytecodeModule, stack: &mut Stack) -> VmResult<ExecutionResult> {
    let floor = stack.return_floor();
    let mut frame_changed = true;

    loop {
        let frame = stack
            .top_mut()
            .ok_or_else(|| VmError::fault("dispatch with no live frame"))?;
        let code = module.function_code(frame.function.ordinal)?;
        if frame_changed {
            if frame.state.lock().is_freed() {
                return Err(VmError::fault("module state has been freed"));
            }
            frame_changed = false;
        }

        let pc = frame.offset;
        if pc >= code.len() {
            return Err(VmError::fault(format!(
                "execution ran off the end of the function at offset {}",
                pc
            )));
        }
        let (instruction, next) = Instruction::decode(code, pc)?;
        trace!(pc, op = instruction.opcode().mnemonic(), "dispatch");
        frame.offset = next;

        let Frame {
            state,
            registers,
            offset,
            ..
        } = frame;

        let step = match instruction {
            Instruction::ConstI32 { value, dst } => {
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::ConstI32Zero { dst } => {
                registers.set_i32(dst, 0)?;
                Step::Next
            }
            Instruction::ConstRefZero { dst } => {
                registers.put_ref(dst, None)?;
                Step::Next
            }
            Instruction::ConstRefRodata { rodata, dst } => {
                let buffer = state.lock().rodata_ref(rodata)?;
                registers.put_ref(dst, Some(buffer))?;
                Step::Next
            }
            Instruction::MovI32 { src, dst } => {
                let value = registers.i32(src)?;
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::MovRef { src, dst } => {
                let object = registers.get_ref(src)?;
                registers.put_ref(dst, object)?;
                Step::Next
            }
            Instruction::GlobalLoadI32 { offset: byte, dst } => {
                let value = state.lock().load_i32(byte)?;
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::GlobalStoreI32 { offset: byte, src } => {
                let value = registers.i32(src)?;
                state.lock().store_i32(byte, value)?;
                Step::Next
            }
            Instruction::GlobalLoadRef { global, dst } => {
                let object = state.lock().global_ref(global)?;
                registers.put_ref(dst, object)?;
                Step::Next
            }
            Instruction::GlobalStoreRef { global, src } => {
                let object = registers.ref_slot(src)?;
                state.lock().set_global_ref(global, object.as_ref())?;
                Step::Next
            }
            Instruction::GlobalResetRef { global } => {
                state.lock().reset_global_ref(global)?;
                Step::Next
            }
            Instruction::SelectI32 {
                cond,
                if_true,
                if_false,
                dst,
            } => {
                let chosen = if registers.i32(cond)? != 0 {
                    if_true
                } else {
                    if_false
                };
                let value = registers.i32(chosen)?;
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::Binary { op, lhs, rhs, dst } => {
                let value = op
                    .apply(registers.i32(lhs)?, registers.i32(rhs)?)
                    .ok_or_else(|| {
                        VmError::fault(format!("integer division by zero at offset {}", pc))
                    })?;
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::NotI32 { src, dst } => {
                let value = !registers.i32(src)?;
                registers.set_i32(dst, value)?;
                Step::Next
            }
            Instruction::Compare { op, lhs, rhs, dst } => {
                let value = op.apply(registers.i32(lhs)?, registers.i32(rhs)?);
                registers.set_i32(dst, value as i32)?;
                Step::Next
            }
            Instruction::CmpNzI32 { src, dst } => {
                let value = registers.i32(src)? != 0;
                registers.set_i32(dst, value as i32)?;
                Step::Next
            }
            Instruction::CmpNzRef { src, dst } => {
                let value = registers.ref_slot(src)?.is_some();
                registers.set_i32(dst, value as i32)?;
                Step::Next
            }
            Instruction::Branch { target } => {
                *offset = branch_target(target, code.len())?;
                Step::Next
            }
            Instruction::CondBranch {
                cond,
                true_target,
                false_target,
            } => {
                let target = if registers.i32(cond)? != 0 {
                    true_target
                } else {
                    false_target
                };
                *offset = branch_target(target, code.len())?;
                Step::Next
            }
            Instruction::Call {
                function,
                args,
                results,
            } => Step::Call {
                callee: module.internal_ref(function as usize)?,
                state: Some(Arc::clone(state)),
                args: registers.read_list(&args)?,
                results,
                nested: false,
            },
            Instruction::CallImport {
                import,
                args,
                results,
            } => {
                let callee = state
                    .lock()
                    .import(import)?
                    .to_internal()
                    .map_err(|e| VmError::fault(e.message))?;
                let shared = callee.belongs_to(module.id());
                Step::Call {
                    callee,
                    state: if shared { Some(Arc::clone(state)) } else { None },
                    args: registers.read_list(&args)?,
                    results,
                    nested: !shared,
                }
            }
            Instruction::Return { results } => Step::Return(registers.read_list(&results)?),
            Instruction::Yield => Step::Suspend(ExecutionResult::Yielded),
            Instruction::Await { mode, handles } => {
                let mut waits = Vec::with_capacity(handles.len());
                for operand in &handles {
                    if !operand.is_ref {
                        return Err(VmError::fault(format!(
                            "await operand {} is not a ref register",
                            operand.index
                        )));
                    }
                    let handle = registers
                        .ref_slot(operand.index)?
                        .as_ref()
                        .and_then(|object| object.downcast_ref::<WaitHandle>())
                        .cloned()
                        .ok_or_else(|| {
                            VmError::fault(format!(
                                "await on ref register {} which holds no wait handle",
                                operand.index
                            ))
                        })?;
                    waits.push(handle);
                }
                let wait = WaitSet::new(mode, waits).map_err(|e| VmError::fault(e.message))?;
                Step::Suspend(ExecutionResult::Awaiting(wait))
            }
            Instruction::Fail { code: reg } => {
                return Err(VmError::fault(format!(
                    "fail instruction raised code {}",
                    registers.i32(reg)?
                )));
            }
        };

        match step {
            Step::Next => {}
            Step::Call {
                callee,
                state,
                args,
                results,
                nested,
            } => {
                let state = match state {
                    Some(state) => state,
                    None => stack.state_for(&callee).ok_or_else(|| {
                        VmError::fault(format!(
                            "no module state registered for imported module {}",
                            callee.module.name()
                        ))
                    })?,
                };
                let callee_module = Arc::clone(&callee.module);
                stack.push_callee(callee, state, args, Some(results))?;
                frame_changed = true;
                if nested {
                    stack.enter_nested();
                    let outcome = callee_module.execute(stack);
                    stack.leave_nested();
                    match outcome? {
                        ExecutionResult::Returned => {}
                        suspended => return Ok(suspended),
                    }
                }
            }
            Step::Return(values) => {
                stack.complete_frame(values)?;
                frame_changed = true;
                if stack.depth() < floor {
                    return Ok(ExecutionResult::Returned);
                }
                let foreign = stack
                    .top()
                    .filter(|caller| !caller.function.belongs_to(module.id()))
                    .map(|caller| Arc::clone(&caller.function.module));
                if let Some(owner) = foreign {
                    trace!(module = owner.name(), "resume caller in its own module");
                    return owner.execute(stack);
                }
            }
            Step::Suspend(result) => {
                debug!(pc, depth = stack.depth(), result = ?result, "suspend");
                return Ok(result);
            }
        }
    }
}
