// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fatal runtime errors.
//!
//! Nothing in this layer is recoverable. Every kind below ends in a panic
//! carrying a readable message and, outside `production` builds, the source
//! location of the failing call. Faults inside a coroutine body abort the
//! process instead: they must not unwind across a suspension point.

use std::panic::Location;

use thiserror::Error;

use crate::config;

/// A fatal runtime error kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Dereferenced an empty managed pointer or dynamic container.
    #[error("invalid memory access: dereferenced an empty {what}")]
    InvalidMemory { what: &'static str },

    /// Checked downcast named the wrong type.
    #[error("incompatible type: expected `{expected}`, found `{found}`")]
    IncompatibleType {
        expected: &'static str,
        found: &'static str,
    },

    /// The allocator refused a request.
    #[error("memory allocation failed: {bytes} bytes requested")]
    MemoryAllocationFailed { bytes: usize },

    /// `alloc(length, capacity)` with a negative length or length > capacity.
    #[error("invalid allocation range: length {length} with capacity {capacity}")]
    AllocationRange { length: isize, capacity: isize },

    #[error("index out of range [{index}] with length {length}")]
    IndexOutOfRange { index: isize, length: usize },

    #[error("slice bounds out of range [{start}:{end}] with capacity {capacity}")]
    SlicingOutOfRange {
        start: isize,
        end: isize,
        capacity: usize,
    },

    #[error("integer divide by zero")]
    DivideByZero,

    /// A frame was pushed on the retire list twice.
    #[error("coroutine frame {frame} retired twice")]
    DoubleRetire { frame: u64 },

    /// A frame was awaited or resumed after it completed.
    #[error("coroutine frame {frame} awaited or resumed after completion")]
    DoubleAwait { frame: u64 },

    /// Park was handed a slot that already holds a parked frame.
    #[error("park output slot already holds frame {occupant}")]
    InvalidParkSlot { occupant: u64 },

    /// A thread-bound frame was scheduled on a thread other than its own.
    #[error("coroutine frame {frame} belongs to another thread")]
    ForeignFrame { frame: u64 },

    /// A suspension primitive ran with no worker pumping on this thread.
    #[error("no worker is pumping on this thread")]
    NoActiveWorker,

    /// The root task is still suspended after its worker went quiet.
    #[error("task stalled: frame {frame} is suspended and nothing is left to run")]
    Stalled { frame: u64 },

    /// A coroutine body panicked.
    #[error("unhandled fault in coroutine frame {frame}: {message}")]
    UnhandledFault { frame: u64, message: String },
}

/// Format the message a fatal error is raised with.
fn render(err: &RuntimeError, location: &Location<'_>) -> String {
    if config::SOURCE_LOCATIONS {
        format!("{} [at {}]", err, location)
    } else {
        err.to_string()
    }
}

/// Raise a fatal runtime error.
#[cold]
#[track_caller]
pub fn fatal(err: RuntimeError) -> ! {
    let message = render(&err, Location::caller());
    tracing::error!(%message, "fatal runtime error");
    panic!("{}", message);
}

/// Abort the process for a fault that must not unwind any further.
#[cold]
#[track_caller]
pub fn abort(err: RuntimeError) -> ! {
    let message = render(&err, Location::caller());
    tracing::error!(%message, "aborting");
    eprintln!("fatal: {}", message);
    std::process::abort();
}

/// Empty-pointer dereference. Under `unchecked` the diagnostic is stripped.
#[cold]
#[track_caller]
pub(crate) fn invalid_memory(what: &'static str) -> ! {
    if config::SAFETY_CHECKS {
        fatal(RuntimeError::InvalidMemory { what })
    } else {
        std::process::abort()
    }
}

/// Extract a message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
