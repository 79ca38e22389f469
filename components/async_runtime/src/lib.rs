//! Host-side scheduling for register VM stacks.
//!
//! This crate drives many call chains through their suspension points:
//! - Event loop that round-robins yielded stacks
//! - Parking of awaiting stacks until their wait handles are signaled
//! - Per-task results and faults
//!
//! # Overview
//!
//! - [`EventLoop`] - Cooperative scheduler over [`Task`]s
//! - [`TaskQueue`] - FIFO queue of ready tasks
//! - [`SchedulerConfig`] - Turn budget and idle timeout
//!
//! # Examples
//!
//! ```
//! use async_runtime::{EventLoop, SchedulerConfig};
//!
//! let mut event_loop = EventLoop::new(SchedulerConfig::default());
//! event_loop.run_until_done().unwrap();
//! assert!(event_loop.is_idle());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod event_loop;
pub mod task_queue;

// Re-export main types at crate root
pub use config::SchedulerConfig;
pub use event_loop::{EventLoop, TaskResult};
pub use task_queue::{Task, TaskId, TaskQueue};
