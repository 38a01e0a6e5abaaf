// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Vireo runtime library.
//!
//! The substrate under generated code: exact reference counting for every
//! heap value, and a stackless coroutine core whose suspensions all go
//! through a per-worker trampoline.
//!
//! Components:
//! - ownership: ownership cells and managed pointers
//! - buffer: aliasable growable slices and byte strings
//! - dynamic: `Any` and offset-dispatched trait objects
//! - coro: frames, run queue, retire list, tasks, park, worker pool
//! - lock/cancel: runtime lock with park hand-off, cooperative cancellation
//! - arith/error/config: checked arithmetic, fatal errors, build switches

pub mod arith;
pub mod buffer;
pub mod cancel;
pub mod config;
pub mod coro;
pub mod dynamic;
pub mod error;
pub mod lock;
pub mod ownership;

pub use buffer::{Slice, Str};
pub use cancel::{CancelToken, Cancelled};
pub use config::{BuildConfig, ConfigError, RuntimeConfig};
pub use coro::{block_on, park, spawn_detached, yield_now, LockToken, ParkSlot, Task, VoidTask, Worker, WorkerPool};
pub use dynamic::{Any, TraitObj};
pub use error::RuntimeError;
pub use lock::RuntimeLock;
pub use ownership::Ptr;
