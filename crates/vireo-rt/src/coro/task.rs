// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task handles and the suspension primitives used inside frame bodies.
//!
//! Three disposal policies:
//! - `Task<T>`: awaited once; the awaiter takes the output and destroys the
//!   frame on the spot.
//! - `VoidTask`: the same with no output.
//! - detached ([`spawn_detached`]): no handle; the frame retires itself.
//!
//! Tasks are worker-local: bodies need not be `Send`, and a `Task` handle
//! stays on the thread that created it.
//!
//! Awaiting a task installs the awaiting frame as the child's continuation
//! and pushes the child onto the run queue. The child runs next; when it
//! returns, its continuation is pushed back. Control never passes directly
//! from one frame to another.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::trace;

use super::frame::{Disposal, FrameHandle};
use super::worker::{try_with_current, with_current, Worker};
use crate::error::{fatal, RuntimeError};

/// Handle to a frame whose output is awaited exactly once.
///
/// Dropping a handle whose frame never started destroys it. Dropping one
/// whose frame is still in flight detaches the frame instead.
#[must_use = "a task does nothing until started or awaited"]
pub struct Task<T> {
    frame: Option<FrameHandle>,
    started: bool,
    _marker: PhantomData<(fn() -> T, *const ())>,
}

/// A task with no output.
pub type VoidTask = Task<()>;

impl<T: 'static> Task<T> {
    /// Allocate a frame for `future`. It does not run until started or
    /// awaited.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            frame: Some(FrameHandle::allocate(future, Disposal::Awaited)),
            started: false,
            _marker: PhantomData,
        }
    }
}

impl<T> Task<T> {
    /// The underlying frame, until the output has been taken.
    pub fn frame(&self) -> Option<FrameHandle> {
        self.frame
    }

    pub fn frame_id(&self) -> Option<u64> {
        self.frame.map(|f| f.id())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_complete(&self) -> bool {
        self.frame.is_some_and(|f| f.is_complete())
    }

    /// Queue the frame on `worker` without awaiting it yet.
    #[track_caller]
    pub fn start_on(&mut self, worker: &Worker) {
        let Some(frame) = self.frame else {
            fatal(RuntimeError::DoubleAwait { frame: 0 });
        };
        if !self.started {
            self.started = true;
            worker.schedule(frame);
        }
    }

    /// Queue the frame on the current worker without awaiting it yet.
    #[track_caller]
    pub fn start(&mut self) {
        with_current(|worker| self.start_on(worker));
    }

    /// Take the output and destroy the frame, if it has completed.
    pub fn try_take_output(&mut self) -> Option<T> {
        let frame = self.frame.filter(FrameHandle::is_complete)?;
        self.frame = None;
        // SAFETY: the frame was allocated for a body whose output is `T`,
        // and this handle is its only owner.
        let value = unsafe { frame.take_output::<T>() };
        unsafe { destroy(frame) };
        value
    }
}

/// Destroy `frame`, crediting the worker that last ran it if that worker
/// is the one pumping.
///
/// # Safety
/// No copy of `frame` may be used afterwards.
unsafe fn destroy(frame: FrameHandle) {
    let runner = frame.runner();
    frame.destroy();
    try_with_current(|worker| worker.note_destroyed(runner));
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let Some(frame) = this.frame else {
            fatal(RuntimeError::DoubleAwait { frame: 0 });
        };
        if frame.is_complete() {
            return match this.try_take_output() {
                Some(value) => Poll::Ready(value),
                None => fatal(RuntimeError::DoubleAwait { frame: frame.id() }),
            };
        }
        with_current(|worker| {
            let Some(parent) = worker.current_frame() else {
                fatal(RuntimeError::NoActiveWorker);
            };
            if frame.continuation().is_none() {
                frame.set_continuation(Some(parent));
            }
            if !this.started {
                this.started = true;
                worker.enqueue(frame);
            }
        });
        Poll::Pending
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if !self.started || frame.is_complete() {
            // SAFETY: not running anywhere and this handle owns it.
            unsafe { destroy(frame) };
        } else {
            trace!(frame = frame.id(), "task dropped in flight; detaching");
            frame.set_continuation(None);
            frame.set_disposal(Disposal::Detached);
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("frame", &self.frame)
            .field("started", &self.started)
            .finish()
    }
}

/// Start `future` as a detached frame on the current worker.
#[track_caller]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    with_current(|worker| worker.spawn_detached(future));
}

/// Let every other runnable frame on this worker go first.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[must_use = "yield_now does nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        with_current(Worker::request_yield);
        Poll::Pending
    }
}

/// Run `future` to completion on a fresh worker on this thread.
#[track_caller]
pub fn block_on<F>(future: F) -> F::Output
where
    F: Future + 'static,
    F::Output: 'static,
{
    Worker::new().block_on(Task::new(future))
}
