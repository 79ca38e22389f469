//! Tasks and the ready queue.
//!
//! A task wraps one [`Stack`] whose entry call has already been pushed. The
//! event loop resumes tasks one turn at a time from a FIFO queue.

use std::collections::VecDeque;
use std::fmt;

use core_types::VmResult;
use interpreter::{ExecutionResult, Stack, Value};

/// Identifier of a spawned task, unique within one event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A call chain scheduled on an event loop.
pub struct Task {
    id: TaskId,
    stack: Stack,
    turns: usize,
}

impl Task {
    /// Creates a task running `stack`.
    pub fn new(id: TaskId, stack: Stack) -> Self {
        Self { id, stack, turns: 0 }
    }

    /// Task identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Number of times the task has been resumed.
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// The task's stack.
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Runs the stack until it returns or suspends.
    pub fn run(&mut self) -> VmResult<ExecutionResult> {
        self.turns += 1;
        self.stack.run()
    }

    /// Takes the results of a returned stack.
    pub fn into_results(mut self) -> Vec<Value> {
        self.stack.take_results()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("turns", &self.turns)
            .field("status", &self.stack.status())
            .finish()
    }
}

/// A queue for tasks.
///
/// Tasks are processed in FIFO order, one at a time.
#[derive(Debug, Default)]
pub struct TaskQueue {
    queue: VecDeque<Task>,
}

impl TaskQueue {
    /// Creates a new empty TaskQueue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task to the end of the queue.
    pub fn enqueue(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    /// Removes and returns the task at the front of the queue.
    pub fn dequeue(&mut self) -> Option<Task> {
        self.queue.pop_front()
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
