//! Process lifecycle: `Running -> Stopping -> Draining -> Terminated`.
//!
//! A single shared [`Lifecycle`] is the pipeline's only cancellation
//! primitive. Intake and workers poll it cooperatively. Transitions only move
//! forward, and the first recorded shutdown cause wins.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Pipeline phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Normal intake and processing.
    Running = 0,
    /// Intake is being stopped.
    Stopping = 1,
    /// Intake stopped; workers empty the queue.
    Draining = 2,
    /// Workers must exit now.
    Terminated = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Running,
            1 => Phase::Stopping,
            2 => Phase::Draining,
            _ => Phase::Terminated,
        }
    }
}

/// Why the pipeline is shutting down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Interrupt or termination signal.
    Signal,
    /// Intake ended on its own (source exhausted).
    StreamEnded,
    /// Unrecoverable error somewhere in the pipeline.
    Fatal(String),
}

impl ShutdownCause {
    /// Process exit status for this cause.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownCause::Signal | ShutdownCause::StreamEnded => 0,
            ShutdownCause::Fatal(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal => write!(f, "signal"),
            ShutdownCause::StreamEnded => write!(f, "stream ended"),
            ShutdownCause::Fatal(reason) => write!(f, "fatal error: {}", reason),
        }
    }
}

/// Shared lifecycle state.
pub struct Lifecycle {
    phase: AtomicU8,
    cause: Mutex<Option<ShutdownCause>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Running as u8),
            cause: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// True once workers must stop regardless of queued work.
    pub fn is_terminated(&self) -> bool {
        self.phase() == Phase::Terminated
    }

    /// Request shutdown. Moves `Running -> Stopping`.
    ///
    /// The first cause is kept, except that a fatal cause replaces an
    /// earlier non-fatal one: a failure while draining still exits non-zero.
    ///
    /// Returns true if this call initiated the shutdown.
    pub fn request_stop(&self, cause: ShutdownCause) -> bool {
        {
            let mut slot = self.cause.lock();
            let escalate = matches!(cause, ShutdownCause::Fatal(_))
                && !matches!(*slot, Some(ShutdownCause::Fatal(_)));
            match slot.as_ref() {
                None => *slot = Some(cause.clone()),
                Some(previous) if escalate => {
                    tracing::error!(previous = %previous, cause = %cause, "fatal error during shutdown");
                    *slot = Some(cause.clone());
                }
                Some(_) => {}
            }
        }
        let initiated = self.advance_to(Phase::Stopping);
        if initiated {
            match &cause {
                ShutdownCause::Fatal(reason) => {
                    tracing::error!(reason = %reason, "fatal error, shutting down")
                }
                other => tracing::info!(cause = %other, "shutdown requested"),
            }
        }
        initiated
    }

    /// Escalate an error to a process-wide shutdown.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.request_stop(ShutdownCause::Fatal(reason.into()))
    }

    /// Move forward to `target`. Never moves backward.
    ///
    /// Returns true if the phase changed.
    pub fn advance_to(&self, target: Phase) -> bool {
        let target = target as u8;
        let mut current = self.phase.load(Ordering::Acquire);
        while current < target {
            match self.phase.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(phase = ?Phase::from_u8(target), "lifecycle transition");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub fn cause(&self) -> Option<ShutdownCause> {
        self.cause.lock().clone()
    }

    /// Exit status for the process; 0 while no fatal cause is recorded.
    pub fn exit_code(&self) -> i32 {
        self.cause().map(|c| c.exit_code()).unwrap_or(0)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
