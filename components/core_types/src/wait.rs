//! Wait handles used by cooperative suspension.
//!
//! Bytecode suspends on an `await` instruction naming one or more wait
//! handles. The dispatch loop never blocks; it hands the [`WaitSet`] back to
//! the host, which decides how to wait for it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{VmError, VmResult};

static NEXT_WAIT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Polling slice used when waiting on any of several independent handles.
const ANY_POLL_SLICE: Duration = Duration::from_millis(1);

struct WaitEvent {
    id: u64,
    signaled: Mutex<bool>,
    condvar: Condvar,
}

/// A thread-safe manual-reset event.
///
/// Clones share the same underlying event.
///
/// # Examples
///
/// ```
/// use core_types::WaitHandle;
///
/// let handle = WaitHandle::new();
/// assert!(!handle.is_signaled());
/// handle.signal();
/// assert!(handle.is_signaled());
/// ```
#[derive(Clone)]
pub struct WaitHandle {
    event: Arc<WaitEvent>,
}

impl WaitHandle {
    /// Create a new unsignaled handle.
    pub fn new() -> Self {
        Self {
            event: Arc::new(WaitEvent {
                id: NEXT_WAIT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                signaled: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Create a handle that starts signaled.
    pub fn signaled() -> Self {
        let handle = Self::new();
        handle.signal();
        handle
    }

    /// Process-unique identifier of the underlying event.
    pub fn id(&self) -> u64 {
        self.event.id
    }

    /// Signal the event, waking every waiter.
    pub fn signal(&self) {
        let mut signaled = self.event.signaled.lock();
        *signaled = true;
        self.event.condvar.notify_all();
    }

    /// Return the event to the unsignaled state.
    pub fn reset(&self) {
        *self.event.signaled.lock() = false;
    }

    /// Returns true if the event is signaled.
    pub fn is_signaled(&self) -> bool {
        *self.event.signaled.lock()
    }

    /// Block until signaled or until `timeout` elapses.
    ///
    /// Returns true if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.event.signaled.lock();
        while !*signaled {
            if self
                .event
                .condvar
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                return *signaled;
            }
        }
        true
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut signaled = self.event.signaled.lock();
        while !*signaled {
            self.event.condvar.wait(&mut signaled);
        }
    }

    /// Returns true if both handles share the same event.
    pub fn ptr_eq(&self, other: &WaitHandle) -> bool {
        Arc::ptr_eq(&self.event, &other.event)
    }
}

impl Default for WaitHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("id", &self.event.id)
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// How a [`WaitSet`] is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Every handle must be signaled
    All,
    /// At least one handle must be signaled
    Any,
}

impl WaitMode {
    /// Decode the mode operand of an await instruction.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WaitMode::All),
            1 => Some(WaitMode::Any),
            _ => None,
        }
    }

    /// Encode as the await instruction operand.
    pub fn to_u8(self) -> u8 {
        match self {
            WaitMode::All => 0,
            WaitMode::Any => 1,
        }
    }
}

/// The wait condition recorded by an `await` instruction: one or more
/// handles plus the mode that decides when the condition is met.
#[derive(Debug, Clone)]
pub struct WaitSet {
    /// Satisfaction mode
    pub mode: WaitMode,
    /// Handles being waited on (never empty)
    pub handles: Vec<WaitHandle>,
}

impl WaitSet {
    /// Create a wait set.
    ///
    /// Fails with `InvalidArgument` if `handles` is empty.
    pub fn new(mode: WaitMode, handles: Vec<WaitHandle>) -> VmResult<Self> {
        if handles.is_empty() {
            return Err(VmError::invalid_argument(
                "a wait set requires at least one wait handle",
            ));
        }
        Ok(Self { mode, handles })
    }

    /// Returns true if the wait condition is currently met.
    pub fn is_satisfied(&self) -> bool {
        match self.mode {
            WaitMode::All => self.handles.iter().all(WaitHandle::is_signaled),
            WaitMode::Any => self.handles.iter().any(WaitHandle::is_signaled),
        }
    }

    /// Block the calling thread until the condition is met.
    ///
    /// With a `timeout`, fails with `DeadlineExceeded` once it elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> VmResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        match self.mode {
            WaitMode::All => {
                for handle in &self.handles {
                    match deadline {
                        Some(deadline) => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            if !handle.wait_timeout(remaining) {
                                return Err(self.deadline_error());
                            }
                        }
                        None => handle.wait(),
                    }
                }
                Ok(())
            }
            WaitMode::Any => loop {
                if self.is_satisfied() {
                    return Ok(());
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(self.deadline_error());
                    }
                }
                self.handles[0].wait_timeout(ANY_POLL_SLICE);
            },
        }
    }

    fn deadline_error(&self) -> VmError {
        VmError::deadline_exceeded(format!(
            "wait on {} handle(s) ({:?}) timed out",
            self.handles.len(),
            self.mode
        ))
    }
}
