// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-thread worker: run queue, retire list and driver loop.
//!
//! A `Worker` is the explicit context a thread pumps frames through. It is
//! not `Send`; nothing in it is shared or locked. While [`Worker::pump`]
//! runs, the worker is installed as the thread's current worker so the
//! suspension primitives inside frame bodies can reach it.
//!
//! Driver loop: pop one frame, resume it unless already complete, destroy
//! everything on the retire list, repeat until the queue is empty. Frames
//! that yielded wait on a side list and rejoin the queue only when it runs
//! dry.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::ptr;

use tracing::{debug, trace, warn};

use super::frame::{Disposal, FrameHandle, FrameState};
use super::park::{LockToken, ParkSlot};
use super::retire::RetireList;
use super::task::Task;
use super::trampoline::ReadyQueue;
use crate::config;
use crate::error::{fatal, RuntimeError};

thread_local! {
    static CURRENT: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// Run `f` against the worker pumping on this thread.
///
/// Fatal when no worker is pumping.
#[track_caller]
pub(crate) fn with_current<R>(f: impl FnOnce(&Worker) -> R) -> R {
    match try_with_current(f) {
        Some(r) => r,
        None => fatal(RuntimeError::NoActiveWorker),
    }
}

pub(crate) fn try_with_current<R>(f: impl FnOnce(&Worker) -> R) -> Option<R> {
    let worker = CURRENT.with(Cell::get);
    if worker.is_null() {
        return None;
    }
    // SAFETY: CURRENT is only non-null inside an `Enter` scope, which
    // borrows the worker for its whole duration.
    Some(f(unsafe { &*worker }))
}

/// Restores the previous current worker on drop.
struct Enter {
    prev: *const Worker,
}

impl Drop for Enter {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.prev));
    }
}

/// How the frame being resumed asked to be suspended.
enum Suspension {
    Park {
        slot: *const ParkSlot,
        token: LockToken,
    },
    Yield,
}

/// Counters for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WorkerStats {
    /// Frames resumed by the driver loop.
    pub resumed: u64,
    /// Pushes onto the run queue.
    pub enqueued: u64,
    pub parked: u64,
    pub yielded: u64,
    /// Frames pushed onto the retire list.
    pub retired: u64,
    /// Frames this worker ran that were then destroyed on it, by the
    /// retire list or by a task taking their output while it pumped.
    pub destroyed: u64,
    /// Deepest the run queue has been.
    pub peak_queue_depth: usize,
}

/// Per-thread scheduling context.
pub struct Worker {
    ready: ReadyQueue,
    deferred: ReadyQueue,
    retired: RetireList,
    current: Cell<Option<FrameHandle>>,
    suspension: Cell<Option<Suspension>>,
    release_hook: Box<dyn Fn(LockToken)>,
    stats: Cell<WorkerStats>,
}

impl Worker {
    /// A worker whose park releases [`RuntimeLock`](crate::lock::RuntimeLock)s.
    pub fn new() -> Self {
        // SAFETY: tokens reaching this hook come from `RuntimeLock::lock_for_park`
        // or from a caller who promised the same through `LockToken::from_raw`.
        Self::with_release_hook(|token| unsafe { crate::lock::release_token(token) })
    }

    /// A worker whose park hands non-empty lock tokens to `hook`.
    pub fn with_release_hook(hook: impl Fn(LockToken) + 'static) -> Self {
        Self {
            ready: ReadyQueue::new(),
            deferred: ReadyQueue::new(),
            retired: RetireList::new(),
            current: Cell::new(None),
            suspension: Cell::new(None),
            release_hook: Box::new(hook),
            stats: Cell::new(WorkerStats::default()),
        }
    }

    fn enter(&self) -> Enter {
        Enter {
            prev: CURRENT.with(|c| c.replace(self)),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.get()
    }

    /// Frames waiting to run, including yielded ones.
    pub fn pending(&self) -> usize {
        self.ready.len() + self.deferred.len()
    }

    /// The frame being resumed right now, if any.
    pub fn current_frame(&self) -> Option<FrameHandle> {
        self.current.get()
    }

    /// Queue `frame` to run on this worker.
    ///
    /// Scheduling a thread-bound frame away from its thread is always
    /// fatal. Scheduling a completed frame is fatal when protocol checks
    /// are on.
    #[track_caller]
    pub fn schedule(&self, frame: FrameHandle) {
        if !frame.is_at_home() {
            fatal(RuntimeError::ForeignFrame { frame: frame.id() });
        }
        if config::PROTOCOL_CHECKS && frame.is_complete() {
            fatal(RuntimeError::DoubleAwait { frame: frame.id() });
        }
        self.enqueue(frame);
    }

    pub(crate) fn enqueue(&self, frame: FrameHandle) {
        if self.ready.push(frame) {
            let depth = self.ready.len();
            self.bump(|s| {
                s.enqueued += 1;
                s.peak_queue_depth = s.peak_queue_depth.max(depth);
            });
        }
    }

    /// Start `future` as a detached frame on this worker.
    pub fn spawn_detached<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let frame = FrameHandle::allocate(future, Disposal::Detached);
        trace!(frame = frame.id(), "spawn detached");
        self.enqueue(frame);
    }

    /// Run `task` to completion on this thread and return its output.
    ///
    /// Fatal with `Stalled` when the queue empties first, e.g. because the
    /// task parked and nothing resumed it.
    #[track_caller]
    pub fn block_on<T>(&self, mut task: Task<T>) -> T {
        let _enter = self.enter();
        task.start_on(self);
        self.pump();
        match task.try_take_output() {
            Some(value) => value,
            None => fatal(RuntimeError::Stalled {
                frame: task.frame_id().unwrap_or(0),
            }),
        }
    }

    /// Drive queued frames until none is runnable. Returns how many resumes
    /// ran.
    pub fn pump(&self) -> usize {
        let _enter = self.enter();
        let mut resumed = 0;
        while let Some(frame) = self.ready.pop().or_else(|| self.refill()) {
            if !frame.is_complete() {
                self.resume(frame);
                resumed += 1;
            }
            self.drain_retired();
        }
        resumed
    }

    /// Move yielded frames back onto the run queue, oldest on top.
    fn refill(&self) -> Option<FrameHandle> {
        while let Some(frame) = self.deferred.pop() {
            self.ready.push(frame);
        }
        self.ready.pop()
    }

    fn drain_retired(&self) {
        if self.retired.is_empty() {
            return;
        }
        // SAFETY: retired frames are complete and no handle to them is used again.
        let n = unsafe { self.retired.drain() };
        self.bump(|s| s.destroyed += n as u64);
    }

    fn resume(&self, frame: FrameHandle) {
        trace!(frame = frame.id(), "resume");
        frame.set_state(FrameState::Running);
        frame.set_runner(self.id());
        let outer = self.current.replace(Some(frame));
        // SAFETY: the frame came off our queue, so it is live, not complete,
        // and this thread has exclusive use of it.
        let complete = unsafe { frame.poll() };
        self.current.set(outer);
        self.bump(|s| s.resumed += 1);

        if complete {
            frame.set_state(FrameState::Complete);
            self.suspension.set(None);
            self.finalize(frame);
            return;
        }

        frame.set_state(FrameState::Suspended);
        match self.suspension.take() {
            Some(Suspension::Yield) => {
                self.deferred.push(frame);
                self.bump(|s| s.yielded += 1);
            }
            Some(Suspension::Park { slot, token }) => {
                self.bump(|s| s.parked += 1);
                debug!(frame = frame.id(), ?token, "park");
                // SAFETY: the slot is borrowed by the frame's pending `Park`,
                // which lives until the frame is resumed again.
                let slot = unsafe { &*slot };
                // Publish first; the frame may run elsewhere from here on.
                slot.publish(frame);
                if !token.is_none() {
                    (self.release_hook)(token);
                }
            }
            // Awaiting a child, whose completion re-queues this frame.
            None => {}
        }
    }

    fn finalize(&self, frame: FrameHandle) {
        match frame.disposal() {
            Disposal::Awaited => {
                if let Some(parent) = frame.take_continuation() {
                    self.enqueue(parent);
                }
            }
            Disposal::Detached => self.retire(frame),
        }
    }

    /// Defer destruction of a completed frame to the next safe point.
    #[track_caller]
    pub(crate) fn retire(&self, frame: FrameHandle) {
        trace!(frame = frame.id(), "retire");
        self.retired.push(frame);
        self.bump(|s| s.retired += 1);
    }

    /// Identity recorded on frames this worker resumes.
    fn id(&self) -> *const () {
        self as *const Worker as *const ()
    }

    /// Count a destroy done outside the retire list, if this worker was the
    /// last to run the frame.
    pub(crate) fn note_destroyed(&self, runner: *const ()) {
        if ptr::eq(runner, self.id()) {
            self.bump(|s| s.destroyed += 1);
        }
    }

    pub(crate) fn request_park(&self, slot: &ParkSlot, token: LockToken) {
        self.suspension.set(Some(Suspension::Park { slot, token }));
    }

    pub(crate) fn request_yield(&self) {
        self.suspension.set(Some(Suspension::Yield));
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("ready", &self.ready.len())
            .field("deferred", &self.deferred.len())
            .field("stats", &self.stats.get())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.drain_retired();
        let pending = self.pending();
        if pending > 0 {
            warn!(pending, "worker dropped with runnable frames; they are leaked");
        }
    }
}
