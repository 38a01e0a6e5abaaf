// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Retire list: frames waiting to be destroyed.
//!
//! A detached frame cannot free itself from inside its own completion, so
//! it is pushed here and destroyed by the driver loop at the next safe
//! point, on the same worker. Links live in the frame header.

use std::cell::Cell;

use tracing::trace;

use super::frame::FrameHandle;
use crate::config;
use crate::error::{fatal, RuntimeError};

pub(crate) struct RetireList {
    head: Cell<Option<FrameHandle>>,
}

impl RetireList {
    pub(crate) const fn new() -> Self {
        Self {
            head: Cell::new(None),
        }
    }

    /// Queue `frame` for destruction.
    ///
    /// Retiring a frame twice is fatal when protocol checks are on.
    #[track_caller]
    pub(crate) fn push(&self, frame: FrameHandle) {
        if frame.retired().replace(true) {
            if config::PROTOCOL_CHECKS {
                fatal(RuntimeError::DoubleRetire { frame: frame.id() });
            }
            return;
        }
        frame.next_retired().set(self.head.take());
        self.head.set(Some(frame));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    /// Destroy every queued frame; returns how many.
    ///
    /// # Safety
    /// No handle to a queued frame may be used after this call.
    pub(crate) unsafe fn drain(&self) -> usize {
        let mut count = 0;
        let mut next = self.head.take();
        while let Some(frame) = next {
            next = frame.next_retired().take();
            trace!(frame = frame.id(), "destroy retired frame");
            frame.destroy();
            count += 1;
        }
        count
    }
}
