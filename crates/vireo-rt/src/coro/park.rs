// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Park: hand the current frame to an external scheduler.
//!
//! `park(slot, token).await` suspends the current frame. Once its poll has
//! returned, the worker writes the frame's handle into `slot` and then, if
//! `token` is not [`LockToken::NONE`], releases that lock through the
//! worker's release hook. The frame is not re-queued; someone must take it
//! from the slot and resume it.
//!
//! The handle is always visible in the slot before the lock is free. A
//! waker that takes the lock and then reads the slot therefore cannot miss
//! a frame that parked under that lock.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::task::{Context, Poll};

use super::frame::{FrameHandle, Header};
use super::worker::with_current;
use crate::config;
use crate::error::{fatal, RuntimeError};

/// Opaque reference to a held runtime lock, released by park.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LockToken(usize);

impl LockToken {
    /// No lock to release.
    pub const NONE: LockToken = LockToken(0);

    /// # Safety
    /// A non-zero `raw` must be meaningful to the release hook of every
    /// worker the token reaches. The default hook expects the address of a
    /// held [`RuntimeLock`](crate::lock::RuntimeLock).
    pub const unsafe fn from_raw(raw: usize) -> LockToken {
        LockToken(raw)
    }

    pub const fn into_raw(self) -> usize {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("LockToken(none)")
        } else {
            write!(f, "LockToken({:#x})", self.0)
        }
    }
}

/// Single-frame output slot for park.
#[derive(Default)]
pub struct ParkSlot {
    frame: AtomicPtr<Header>,
}

impl ParkSlot {
    pub const fn new() -> Self {
        Self {
            frame: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn is_occupied(&self) -> bool {
        !self.frame.load(Ordering::Acquire).is_null()
    }

    /// Take the parked frame, leaving the slot empty.
    pub fn take(&self) -> Option<FrameHandle> {
        let raw = self.frame.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: only `publish` stores into the slot, and it stores live frames.
        NonNull::new(raw).map(|p| unsafe { FrameHandle::from_ptr(p) })
    }

    /// Store `frame`. Publishing into an occupied slot is fatal when
    /// protocol checks are on.
    pub(crate) fn publish(&self, frame: FrameHandle) {
        if config::PROTOCOL_CHECKS {
            if let Err(occupant) = self.frame.compare_exchange(
                ptr::null_mut(),
                frame.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // SAFETY: the occupant was published live and nobody took it.
                let occupant = unsafe { FrameHandle::from_ptr(NonNull::new_unchecked(occupant)) };
                fatal(RuntimeError::InvalidParkSlot {
                    occupant: occupant.id(),
                });
            }
        } else {
            self.frame.store(frame.as_ptr(), Ordering::Release);
        }
    }
}

impl fmt::Debug for ParkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkSlot")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

/// Suspend the current frame into `slot`, then release `token`.
pub fn park(slot: &ParkSlot, token: LockToken) -> Park<'_> {
    Park {
        slot,
        token,
        parked: false,
    }
}

/// Future returned by [`park`].
#[must_use = "park does nothing unless awaited"]
pub struct Park<'a> {
    slot: &'a ParkSlot,
    token: LockToken,
    parked: bool,
}

impl Future for Park<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.parked {
            return Poll::Ready(());
        }
        self.parked = true;
        let (slot, token) = (self.slot, self.token);
        with_current(|worker| worker.request_park(slot, token));
        Poll::Pending
    }
}
