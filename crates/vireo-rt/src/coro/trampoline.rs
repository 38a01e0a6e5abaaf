// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Trampoline run queue.
//!
//! A per-worker LIFO stack of ready frames, linked through each frame's own
//! `next_ready` cell. Every suspension that makes another frame runnable
//! pushes it here instead of resuming it, and the worker's driver loop pops
//! and resumes one frame at a time. Native stack depth stays constant no
//! matter how long the logical await chain is.

use std::cell::Cell;

use super::frame::FrameHandle;

/// Intrusive LIFO of ready frames. Not shared across threads.
pub(crate) struct ReadyQueue {
    head: Cell<Option<FrameHandle>>,
    len: Cell<usize>,
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: Cell::new(None),
            len: Cell::new(0),
        }
    }

    /// Push `frame` on top. A frame already on a queue is left where it is;
    /// returns whether it was pushed.
    pub(crate) fn push(&self, frame: FrameHandle) -> bool {
        if frame.queued().replace(true) {
            return false;
        }
        frame.next_ready().set(self.head.get());
        self.head.set(Some(frame));
        self.len.set(self.len.get() + 1);
        true
    }

    /// Pop the most recently pushed frame.
    pub(crate) fn pop(&self) -> Option<FrameHandle> {
        let frame = self.head.get()?;
        self.head.set(frame.next_ready().take());
        frame.queued().set(false);
        self.len.set(self.len.get() - 1);
        Some(frame)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.get()
    }
}
