//! Call stacks and the execution state machine
//!
//! A [`Stack`] is one logical call chain: an ordered sequence of frames that
//! only grows and shrinks at the top. Modules run it through
//! [`Module::execute`], which keeps dispatching until the outermost frame
//! returns or the chain suspends; hosts may resume through any module the
//! chain passes through, or through [`Stack::run`].
//!
//! ```text
//! Ready ──execute──▶ Running ──return──▶ Returned
//!                      │  ▲
//!              yield/await │ resume
//!                      ▼  │
//!               Yielded / Awaiting
//!                      │
//!                    fault ──▶ Faulted (terminal)
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use bytecode_system::RegisterList;
use core_types::{ErrorKind, VmError, VmResult, WaitSet};

use crate::call_frame::{check_register_classes, check_values, Frame};
use crate::config::RuntimeConfig;
use crate::module::{FunctionRef, Module};
use crate::module_state::{ModuleStateRef, StateResolver};
use crate::value::Value;

/// Outcome of one `execute` invocation that did not fault.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// The entry frame returned
    Returned,
    /// Voluntary suspension; resume immediately
    Yielded,
    /// Suspended until the wait set is satisfied
    Awaiting(WaitSet),
}

/// Lifecycle of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    /// Constructed, nothing executed yet
    Ready,
    /// Inside `execute`
    Running,
    /// Suspended by `yield`
    Yielded,
    /// Suspended by `await`
    Awaiting,
    /// The outermost frame returned
    Returned,
    /// A fault aborted the chain
    Faulted,
}

/// One logical call chain.
pub struct Stack {
    frames: Vec<Frame>,
    resolver: Arc<dyn StateResolver>,
    status: StackStatus,
    pending_wait: Option<WaitSet>,
    results: Vec<Value>,
    max_depth: usize,
    // Depth of each callee frame entered through a nested cross-module call.
    nested: Vec<usize>,
}

impl Stack {
    /// Create an empty stack resolving module states through `resolver`.
    pub fn new(resolver: Arc<dyn StateResolver>, config: &RuntimeConfig) -> Self {
        Self {
            frames: Vec::new(),
            resolver,
            status: StackStatus::Ready,
            pending_wait: None,
            results: Vec::new(),
            max_depth: config.max_stack_depth,
            nested: Vec::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> StackStatus {
        self.status
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if no frame is live.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Top frame.
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Mutable top frame.
    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// The wait set of an `Awaiting` stack.
    pub fn pending_wait(&self) -> Option<&WaitSet> {
        self.pending_wait.as_ref()
    }

    /// Frame descriptions from innermost to outermost.
    pub fn backtrace(&self) -> Vec<String> {
        self.frames.iter().rev().map(Frame::describe).collect()
    }

    /// Mark the top frame as the entry of a nested cross-module call.
    pub(crate) fn enter_nested(&mut self) {
        self.nested.push(self.frames.len());
    }

    /// Drop the innermost nesting mark.
    pub(crate) fn leave_nested(&mut self) {
        self.nested.pop();
    }

    /// Depth below which the running `execute` must hand control back.
    ///
    /// Inside a nested call this is the callee's entry depth; at host level
    /// the dispatch only stops once the outermost frame has returned.
    pub(crate) fn return_floor(&self) -> usize {
        self.nested.last().copied().unwrap_or(1)
    }

    /// State registered for the module of `function`.
    pub fn state_for(&self, function: &FunctionRef) -> Option<ModuleStateRef> {
        self.resolver.state_for(function.module.id())
    }

    /// Push the entry frame of a new call chain.
    ///
    /// Export references are rewritten to internal linkage. Fails with
    /// `InvalidArgument` if the stack already has frames, no state is
    /// registered for the function's module, or the arguments do not match
    /// the signature, and with `Fault` if the stack has faulted.
    pub fn push_call(&mut self, function: FunctionRef, args: Vec<Value>) -> VmResult<()> {
        if self.status == StackStatus::Faulted {
            return Err(VmError::fault("stack has faulted and cannot be reused"));
        }
        if !self.frames.is_empty() {
            return Err(VmError::invalid_argument(format!(
                "stack already has {} frames",
                self.frames.len()
            )));
        }
        let function = function.to_internal()?;
        let state = self.state_for(&function).ok_or_else(|| {
            VmError::invalid_argument(format!(
                "no module state registered for module {}",
                function.module.name()
            ))
        })?;
        self.status = StackStatus::Ready;
        self.pending_wait = None;
        self.results.clear();
        self.push_callee(function, state, args, None).map_err(|e| {
            if e.is(ErrorKind::Fault) {
                VmError::invalid_argument(e.message)
            } else {
                e
            }
        })
    }

    /// Push a frame for `callee` from inside a running chain.
    ///
    /// `results` names the caller registers that receive the callee's
    /// results; it must match the callee signature. Argument mismatches and
    /// exceeding the depth limit are faults.
    pub fn push_callee(
        &mut self,
        callee: FunctionRef,
        state: ModuleStateRef,
        args: Vec<Value>,
        results: Option<RegisterList>,
    ) -> VmResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(VmError::fault(format!(
                "stack depth limit of {} frames exceeded",
                self.max_depth
            )));
        }
        let module = Arc::clone(&callee.module);
        let info = module
            .get_function(callee.linkage, callee.ordinal)
            .map_err(|e| VmError::fault(e.message))?;
        if let Some(results) = &results {
            check_register_classes(&info.signature.result_types, results, "result")?;
        }
        let layout = module
            .register_layout(&callee)
            .map_err(|e| VmError::fault(e.message))?;
        let mut frame = Frame::new(callee, state, layout).map_err(|e| VmError::fault(e.message))?;
        frame.registers.bind_arguments(&info.signature, args)?;

        if let (Some(caller), Some(results)) = (self.frames.last_mut(), results) {
            caller.pending_results = Some(results);
        }
        debug!(
            function = %info.name,
            module = module.name(),
            depth = self.frames.len() + 1,
            "push frame"
        );
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the top frame, delivering `values` as its results.
    ///
    /// Results go to the caller's pending result registers, or are kept on
    /// the stack for [`Stack::take_results`] when the outermost frame
    /// returns.
    pub fn complete_frame(&mut self, values: Vec<Value>) -> VmResult<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::fault("return with no live frame"))?;
        let signature = frame
            .function
            .module
            .get_function(frame.function.linkage, frame.function.ordinal)
            .map_err(|e| VmError::fault(e.message))?
            .signature;
        check_values(&signature.result_types, &values, "result")?;
        drop(frame);

        match self.frames.last_mut() {
            Some(caller) => {
                let targets = caller.pending_results.take().unwrap_or_default();
                if targets.len() != values.len() {
                    return Err(VmError::fault(format!(
                        "caller expects {} results, callee returned {}",
                        targets.len(),
                        values.len()
                    )));
                }
                for (target, value) in targets.into_iter().zip(values) {
                    caller.registers.write(target, value)?;
                }
            }
            None => self.results = values,
        }
        Ok(())
    }

    /// Results of the outermost frame once the stack has returned.
    pub fn take_results(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.results)
    }

    /// Entry check shared by [`Module::execute`] implementations.
    ///
    /// Returns `Some` with the result when `module` has nothing to dispatch:
    /// an awaiting stack that is not ready to resume, or a chain through
    /// `module` whose top frame belongs to another module, which is resumed
    /// through that module. Fails with `Fault` on a faulted stack and with
    /// `InvalidArgument` if no frame of the chain belongs to `module` or the
    /// top frame cannot be run by it.
    pub fn begin_execute(&mut self, module: &dyn Module) -> VmResult<Option<ExecutionResult>> {
        if self.status == StackStatus::Faulted {
            return Err(VmError::fault("stack has faulted and cannot be resumed"));
        }
        if self.status == StackStatus::Awaiting {
            if let Some(wait) = &self.pending_wait {
                if !wait.is_satisfied() {
                    return Ok(Some(ExecutionResult::Awaiting(wait.clone())));
                }
            }
        }
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::invalid_argument("stack has no frame to execute"))?;
        if !frame.function.belongs_to(module.id()) {
            if !self.frames.iter().any(|f| f.function.belongs_to(module.id())) {
                return Err(VmError::invalid_argument(format!(
                    "frame function belongs to module {}, not {}",
                    frame.function.module.name(),
                    module.name()
                )));
            }
            // The chain suspended inside a callee of another module.
            let owner = Arc::clone(&frame.function.module);
            return owner.execute(self).map(Some);
        }
        if frame.function.linkage != crate::module::Linkage::Internal {
            return Err(VmError::invalid_argument(format!(
                "cannot execute a function with {} linkage",
                frame.function.linkage
            )));
        }
        module.register_layout(&frame.function)?;

        self.pending_wait = None;
        self.status = StackStatus::Running;
        Ok(None)
    }

    /// Record the outcome of an `execute` invocation.
    ///
    /// A fault marks the stack `Faulted`, attaches the backtrace and drops
    /// every frame.
    pub fn finish_execute(&mut self, outcome: VmResult<ExecutionResult>) -> VmResult<ExecutionResult> {
        match outcome {
            Ok(ExecutionResult::Returned) => {
                if self.frames.is_empty() {
                    self.status = StackStatus::Returned;
                }
                Ok(ExecutionResult::Returned)
            }
            Ok(ExecutionResult::Yielded) => {
                self.status = StackStatus::Yielded;
                Ok(ExecutionResult::Yielded)
            }
            Ok(ExecutionResult::Awaiting(wait)) => {
                self.status = StackStatus::Awaiting;
                self.pending_wait = Some(wait.clone());
                Ok(ExecutionResult::Awaiting(wait))
            }
            Err(err) => {
                let err = if err.stack.is_empty() {
                    let trace = self.backtrace();
                    err.with_stack(trace)
                } else {
                    err
                };
                if self.status != StackStatus::Faulted {
                    warn!(kind = %err.kind, message = %err.message, "stack faulted");
                }
                self.status = StackStatus::Faulted;
                self.frames.clear();
                self.nested.clear();
                Err(err)
            }
        }
    }

    /// Drive the chain until it returns or suspends.
    ///
    /// Executes the module owning the top frame, so a chain that suspended
    /// inside a cross-module call resumes in the callee.
    pub fn run(&mut self) -> VmResult<ExecutionResult> {
        let module = match self.frames.last() {
            Some(frame) => Arc::clone(&frame.function.module),
            None if self.status == StackStatus::Returned => return Ok(ExecutionResult::Returned),
            None if self.status == StackStatus::Faulted => {
                return Err(VmError::fault("stack has faulted and cannot be resumed"))
            }
            None => return Err(VmError::invalid_argument("stack has no frame to execute")),
        };
        module.execute(self)
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("status", &self.status)
            .field("depth", &self.frames.len())
            .field("max_depth", &self.max_depth)
            .field("nested", &self.nested)
            .field("frames", &self.backtrace())
            .finish()
    }
}
