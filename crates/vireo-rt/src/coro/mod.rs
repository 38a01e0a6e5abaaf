// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stackless coroutine core.
//!
//! Bodies are ordinary futures boxed into frames. Every suspension goes
//! through a per-worker run queue pumped by a driver loop, so native stack
//! depth stays bounded however deep the await chain gets.
//!
//! Components:
//! - `frame`: single-allocation frame with intrusive links
//! - `trampoline`: per-worker LIFO run queue
//! - `retire`: deferred destruction of detached frames
//! - `worker`: per-thread context and driver loop
//! - `task`: awaited, void and detached disposal; yield; block_on
//! - `park`: hand a frame to an external scheduler, releasing a lock
//! - `pool`: worker threads with cross-thread resume

pub mod frame;
pub mod park;
pub mod pool;
mod retire;
pub mod task;
mod trampoline;
pub mod worker;

pub use self::frame::FrameHandle;
pub use self::park::{park, LockToken, Park, ParkSlot};
pub use self::pool::{PoolError, WorkerPool};
pub use self::task::{block_on, spawn_detached, yield_now, Task, VoidTask, YieldNow};
pub use self::worker::{Worker, WorkerStats};
