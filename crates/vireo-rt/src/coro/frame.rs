// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine frames.
//!
//! A frame is one heap allocation holding a header, an output slot and the
//! body future. The header carries the lifecycle state, the disposal policy,
//! the awaiting parent and the two intrusive links the run queue and retire
//! list thread through, so suspending or retiring a frame never allocates.
//!
//! Frames are polled with a waker that does nothing. A body suspends only
//! through the runtime's own primitives (awaiting a task, park, yield), and
//! each of those tells the current worker where the frame goes next.
//!
//! The body future is kept until the frame is destroyed, so values the body
//! captured are dropped at destruction rather than at completion.
//!
//! Frames allocated for a worker's own tasks are bound to the thread that
//! allocated them and may hold values that are not `Send`. Only frames
//! whose body is `Send` are free to move between pool threads.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};

use crate::error::{abort, panic_message, RuntimeError};

/// Frame lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameState {
    /// Allocated, never resumed.
    Created,
    /// Suspended at an await, park or yield.
    Suspended,
    /// Being polled by a worker.
    Running,
    /// Body returned; output stored.
    Complete,
}

/// What happens to a frame once its body returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    /// A task handle takes the output and destroys the frame.
    Awaited,
    /// No handle; the frame retires itself on completion.
    Detached,
}

#[repr(C)]
pub(crate) struct Header {
    id: u64,
    state: Cell<FrameState>,
    disposal: Cell<Disposal>,
    queued: Cell<bool>,
    retired: Cell<bool>,
    next_ready: Cell<Option<FrameHandle>>,
    next_retired: Cell<Option<FrameHandle>>,
    continuation: Cell<Option<FrameHandle>>,
    /// Thread the frame must be polled on; `None` for `Send` bodies.
    home: Option<ThreadId>,
    /// Worker that last resumed the frame, compared by address only.
    runner: Cell<*const ()>,
    /// Poll once; true when the body has returned.
    poll: unsafe fn(NonNull<Header>) -> bool,
    destroy: unsafe fn(NonNull<Header>),
}

#[repr(C)]
struct Frame<F: Future> {
    header: Header,
    output: UnsafeCell<Option<F::Output>>,
    future: UnsafeCell<F>,
}

/// Layout prefix shared by every `Frame<F>` whose output is `T`.
#[repr(C)]
struct FramePrefix<T> {
    header: Header,
    output: UnsafeCell<Option<T>>,
}

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD: ThreadId = thread::current().id();
}

pub(crate) fn current_thread() -> ThreadId {
    THREAD.with(|id| *id)
}

/// Copyable, untyped reference to a live frame.
///
/// A handle does not own the frame. Whoever destroys the frame (a task
/// handle, the retire list) must be the last to use any copy of it.
///
/// Handles may be sent to other threads, but only the thread holding the
/// frame's execution rights (the one that took it from a park slot or is
/// pumping it) may use one for anything but [`FrameHandle::id`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle(NonNull<Header>);

// SAFETY: a frame is touched by one thread at a time. Moving a handle to
// another thread goes through the park slot or a pool inbox, both of which
// order the hand-off, and a thread-bound frame is only ever scheduled on
// its home thread (`Worker::schedule`, `WorkerPool::resume`).
unsafe impl Send for FrameHandle {}

impl FrameHandle {
    /// Allocate a frame bound to the current thread.
    pub(crate) fn allocate<F>(future: F, disposal: Disposal) -> FrameHandle
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        Self::allocate_in(future, disposal, Some(current_thread()))
    }

    /// Allocate a frame that may be resumed on any thread.
    pub(crate) fn allocate_send<F>(future: F, disposal: Disposal) -> FrameHandle
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Self::allocate_in(future, disposal, None)
    }

    fn allocate_in<F>(future: F, disposal: Disposal, home: Option<ThreadId>) -> FrameHandle
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let frame = Box::new(Frame {
            header: Header {
                id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
                state: Cell::new(FrameState::Created),
                disposal: Cell::new(disposal),
                queued: Cell::new(false),
                retired: Cell::new(false),
                next_ready: Cell::new(None),
                next_retired: Cell::new(None),
                continuation: Cell::new(None),
                home,
                runner: Cell::new(std::ptr::null()),
                poll: poll_frame::<F>,
                destroy: destroy_frame::<F>,
            },
            output: UnsafeCell::new(None),
            future: UnsafeCell::new(future),
        });
        FrameHandle(NonNull::from(Box::leak(frame)).cast::<Header>())
    }

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        // SAFETY: handles are only used while the frame is live.
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn as_ptr(self) -> *mut Header {
        self.0.as_ptr()
    }

    /// # Safety
    /// `ptr` must come from [`FrameHandle::as_ptr`] on a live frame.
    pub(crate) unsafe fn from_ptr(ptr: NonNull<Header>) -> FrameHandle {
        FrameHandle(ptr)
    }

    /// Process-unique frame id, for diagnostics.
    pub fn id(&self) -> u64 {
        self.header().id
    }

    pub(crate) fn state(&self) -> FrameState {
        self.header().state.get()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state() == FrameState::Complete
    }

    pub(crate) fn disposal(&self) -> Disposal {
        self.header().disposal.get()
    }

    /// Thread the frame is bound to, if any.
    pub(crate) fn home(&self) -> Option<ThreadId> {
        self.header().home
    }

    /// True when the current thread may poll this frame.
    pub(crate) fn is_at_home(&self) -> bool {
        self.home().map_or(true, |home| home == current_thread())
    }

    pub(crate) fn runner(&self) -> *const () {
        self.header().runner.get()
    }

    pub(crate) fn set_runner(&self, worker: *const ()) {
        self.header().runner.set(worker);
    }

    pub(crate) fn set_state(&self, state: FrameState) {
        self.header().state.set(state);
    }

    pub(crate) fn set_disposal(&self, disposal: Disposal) {
        self.header().disposal.set(disposal);
    }

    pub(crate) fn continuation(&self) -> Option<FrameHandle> {
        self.header().continuation.get()
    }

    pub(crate) fn set_continuation(&self, parent: Option<FrameHandle>) {
        self.header().continuation.set(parent);
    }

    pub(crate) fn take_continuation(&self) -> Option<FrameHandle> {
        self.header().continuation.take()
    }

    /// Poll the body once. True when it has returned.
    ///
    /// A panic escaping the body aborts the process.
    ///
    /// # Safety
    /// The frame must be live, not complete, and not being polled elsewhere.
    pub(crate) unsafe fn poll(self) -> bool {
        (self.header().poll)(self.0)
    }

    /// Free the frame, dropping the body and any unclaimed output.
    ///
    /// # Safety
    /// No copy of this handle may be used afterwards.
    pub(crate) unsafe fn destroy(self) {
        (self.header().destroy)(self.0)
    }

    /// Take the stored output.
    ///
    /// # Safety
    /// `T` must be the output type of the body this frame was allocated for.
    pub(crate) unsafe fn take_output<T>(self) -> Option<T> {
        let prefix = self.0.cast::<FramePrefix<T>>();
        (*prefix.as_ref().output.get()).take()
    }

    // Intrusive links, used only by the run queue and the retire list.

    pub(crate) fn queued(&self) -> &Cell<bool> {
        &self.header().queued
    }

    pub(crate) fn next_ready(&self) -> &Cell<Option<FrameHandle>> {
        &self.header().next_ready
    }

    pub(crate) fn retired(&self) -> &Cell<bool> {
        &self.header().retired
    }

    pub(crate) fn next_retired(&self) -> &Cell<Option<FrameHandle>> {
        &self.header().next_retired
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("id", &self.id())
            .field("thread_bound", &self.home().is_some())
            .finish()
    }
}

unsafe fn poll_frame<F: Future>(header: NonNull<Header>) -> bool {
    let frame = header.cast::<Frame<F>>().as_ref();
    // SAFETY: the frame is heap-pinned until destroy and polled by one
    // thread at a time.
    let future = Pin::new_unchecked(&mut *frame.future.get());
    let mut cx = Context::from_waker(Waker::noop());
    match catch_unwind(AssertUnwindSafe(|| future.poll(&mut cx))) {
        Ok(Poll::Ready(value)) => {
            *frame.output.get() = Some(value);
            true
        }
        Ok(Poll::Pending) => false,
        Err(payload) => abort(RuntimeError::UnhandledFault {
            frame: frame.header.id,
            message: panic_message(&*payload),
        }),
    }
}

unsafe fn destroy_frame<F: Future>(header: NonNull<Header>) {
    drop(Box::from_raw(header.cast::<Frame<F>>().as_ptr()));
}
