//! Contract tests for the async runtime public API

use async_runtime::{EventLoop, SchedulerConfig, Task, TaskQueue};
use interpreter::{Context, RuntimeConfig, StackStatus};

/// Test SchedulerConfig contract
#[test]
fn test_scheduler_config_contract() {
    let config = SchedulerConfig::default();
    assert!(config.max_turns > 0);
    assert!(config.idle_timeout().as_millis() > 0);

    let parsed: SchedulerConfig = serde_json::from_str(r#"{"max_turns": 0}"#).unwrap();
    assert_eq!(parsed.max_turns, 0);
    assert_eq!(parsed.idle_timeout_ms, config.idle_timeout_ms);
}

/// Test TaskQueue contract
#[test]
fn test_task_queue_contract() {
    let context = Context::new(RuntimeConfig::default());
    let mut event_loop = EventLoop::default();
    let a = event_loop.spawn(context.new_stack());
    let b = event_loop.spawn(context.new_stack());
    assert_ne!(a, b);
    assert_eq!(a.to_string(), "task-1");

    let mut queue = TaskQueue::new();
    assert!(queue.is_empty());
    queue.enqueue(Task::new(b, context.new_stack()));
    queue.enqueue(Task::new(a, context.new_stack()));
    assert_eq!(queue.len(), 2);
    let first = queue.dequeue().unwrap();
    assert_eq!(first.id(), b);
    assert_eq!(first.turns(), 0);
    assert_eq!(first.stack().status(), StackStatus::Ready);
    assert_eq!(queue.dequeue().unwrap().id(), a);
    assert!(queue.dequeue().is_none());
}

/// Test EventLoop contract
#[test]
fn test_event_loop_contract() {
    let mut event_loop = EventLoop::new(SchedulerConfig::default());
    assert!(event_loop.is_idle());
    assert!(!event_loop.run_turn());
    assert_eq!(event_loop.wake_ready(), 0);
    assert!(event_loop.run_until_done().is_ok());
    assert_eq!(event_loop.config(), &SchedulerConfig::default());
}
