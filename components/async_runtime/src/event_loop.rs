//! Event loop implementation.
//!
//! This module provides the cooperative scheduler that drives many stacks
//! through their suspension points on one thread.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, trace, warn};

use core_types::{VmError, VmResult, WaitHandle, WaitMode, WaitSet};
use interpreter::{Context, ExecutionResult, FunctionRef, Stack, Value};

use crate::config::SchedulerConfig;
use crate::task_queue::{Task, TaskId, TaskQueue};

/// Final outcome of a task.
pub type TaskResult = VmResult<Vec<Value>>;

/// A cooperative scheduler for stacks.
///
/// Each turn takes the oldest ready task and runs it until it returns or
/// suspends:
/// 1. A yielded task goes to the back of the ready queue
/// 2. An awaiting task is parked until its wait set is satisfied
/// 3. A returned or faulted task records its result
///
/// When only parked tasks remain the loop blocks on their handles, and
/// gives up with `DeadlineExceeded` once nothing has become ready for the
/// configured idle timeout.
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, SchedulerConfig};
/// use bytecode_system::{FunctionSignature, ValueType};
/// use interpreter::{Context, NativeModule, RuntimeConfig, Value};
///
/// let mut context = Context::new(RuntimeConfig::default());
/// let host = NativeModule::builder("host")
///     .function(
///         "neg",
///         FunctionSignature::new(vec![ValueType::I32], vec![ValueType::I32]),
///         |args: &[Value]| Ok(vec![Value::I32(-args[0].as_i32().unwrap_or(0))]),
///     )
///     .build()
///     .unwrap();
/// context.register_module(host).unwrap();
///
/// let mut event_loop = EventLoop::new(SchedulerConfig::default());
/// let neg = context.lookup("host.neg").unwrap();
/// let task = event_loop.spawn_call(&context, &neg, vec![Value::I32(3)]).unwrap();
/// event_loop.run_until_done().unwrap();
/// assert_eq!(event_loop.take_result(task).unwrap().unwrap(), vec![Value::I32(-3)]);
/// ```
#[derive(Debug, Default)]
pub struct EventLoop {
    config: SchedulerConfig,
    ready: TaskQueue,
    waiting: Vec<(Task, WaitSet)>,
    finished: HashMap<TaskId, TaskResult>,
    next_id: u64,
}

impl EventLoop {
    /// Creates an event loop with empty queues.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedules `stack`, whose entry call must already be pushed.
    pub fn spawn(&mut self, stack: Stack) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        debug!(task = %id, "spawned task");
        self.ready.enqueue(Task::new(id, stack));
        id
    }

    /// Schedules a call of `function` on a fresh stack of `context`.
    pub fn spawn_call(
        &mut self,
        context: &Context,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> VmResult<TaskId> {
        let mut stack = context.new_stack();
        stack.push_call(function.clone(), args)?;
        Ok(self.spawn(stack))
    }

    /// Number of tasks ready to run.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Number of tasks parked on a wait set.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Returns true if no task is left to run.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.waiting.is_empty()
    }

    /// Result of a finished task.
    pub fn result(&self, id: TaskId) -> Option<&TaskResult> {
        self.finished.get(&id)
    }

    /// Removes and returns the result of a finished task.
    pub fn take_result(&mut self, id: TaskId) -> Option<TaskResult> {
        self.finished.remove(&id)
    }

    /// Moves parked tasks whose wait set is satisfied to the ready queue.
    ///
    /// Returns the number of tasks woken.
    pub fn wake_ready(&mut self) -> usize {
        let mut woken = 0;
        let mut index = 0;
        while index < self.waiting.len() {
            if self.waiting[index].1.is_satisfied() {
                let (task, _) = self.waiting.swap_remove(index);
                trace!(task = %task.id(), "woke task");
                self.ready.enqueue(task);
                woken += 1;
            } else {
                index += 1;
            }
        }
        woken
    }

    /// Runs one ready task for one turn.
    ///
    /// Returns false if no task was ready.
    pub fn run_turn(&mut self) -> bool {
        let mut task = match self.ready.dequeue() {
            Some(task) => task,
            None => return false,
        };

        if self.config.max_turns > 0 && task.turns() >= self.config.max_turns {
            warn!(task = %task.id(), turns = task.turns(), "task exceeded its turn budget");
            let err = VmError::resource_exhausted(format!(
                "{} exceeded {} turns",
                task.id(),
                self.config.max_turns
            ));
            self.finished.insert(task.id(), Err(err));
            return true;
        }

        trace!(task = %task.id(), turn = task.turns() + 1, "run task");
        match task.run() {
            Ok(ExecutionResult::Returned) => {
                debug!(task = %task.id(), turns = task.turns(), "task returned");
                let id = task.id();
                self.finished.insert(id, Ok(task.into_results()));
            }
            Ok(ExecutionResult::Yielded) => self.ready.enqueue(task),
            Ok(ExecutionResult::Awaiting(wait)) => self.waiting.push((task, wait)),
            Err(err) => {
                warn!(task = %task.id(), error = %err, "task faulted");
                self.finished.insert(task.id(), Err(err));
            }
        }
        true
    }

    /// Runs until every task has finished.
    ///
    /// Task faults are recorded per task and do not stop the loop. Fails
    /// with `DeadlineExceeded` if every remaining task stays blocked for
    /// the idle timeout; the blocked tasks stay parked.
    pub fn run_until_done(&mut self) -> VmResult<()> {
        let mut idle_since: Option<Instant> = None;
        loop {
            self.wake_ready();
            if self.run_turn() {
                idle_since = None;
                continue;
            }
            if self.waiting.is_empty() {
                return Ok(());
            }

            let started = *idle_since.get_or_insert_with(Instant::now);
            let timeout = self.config.idle_timeout();
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(blocked = self.waiting.len(), "event loop idle timeout");
                return Err(VmError::deadline_exceeded(format!(
                    "{} task(s) blocked for {:?}",
                    self.waiting.len(),
                    timeout
                )));
            }
            if let Some(blocked) = self.blocking_set() {
                if let Err(err) = blocked.wait(Some(timeout - elapsed)) {
                    trace!(error = %err, blocked = self.waiting.len(), "no handle signaled");
                    continue;
                }
                trace!("blocked handle signaled");
            }
        }
    }

    /// Wait set that completes when any parked task may have become ready.
    fn blocking_set(&self) -> Option<WaitSet> {
        let handles: Vec<WaitHandle> = self
            .waiting
            .iter()
            .flat_map(|(_, wait)| wait.handles.iter())
            .filter(|handle| !handle.is_signaled())
            .cloned()
            .collect();
        WaitSet::new(WaitMode::Any, handles).ok()
    }
}
