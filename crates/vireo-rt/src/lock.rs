// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime lock.
//!
//! Closure-based access: no guard objects, no escaping references. The
//! one exception is [`RuntimeLock::lock_for_park`], which leaves the lock
//! held and returns a [`LockToken`] so that park can release it after the
//! parked frame has been published.

use std::cell::UnsafeCell;
use std::fmt;

use parking_lot::lock_api::RawMutex as RawMutexApi;
use parking_lot::RawMutex;

use crate::coro::LockToken;

/// Exclusive-access wrapper whose lock state can travel as a park token.
pub struct RuntimeLock<T> {
    raw: RawMutex,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `raw`.
unsafe impl<T: Send> Send for RuntimeLock<T> {}
unsafe impl<T: Send> Sync for RuntimeLock<T> {}

impl<T> RuntimeLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: <RawMutex as RawMutexApi>::INIT,
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock and run `f` with exclusive access.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.raw.lock();
        let unlock = Unlock(&self.raw);
        // SAFETY: we hold the lock.
        let r = f(unsafe { &mut *self.value.get() });
        drop(unlock);
        r
    }

    /// Run `f` only if the lock is free right now.
    pub fn try_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.raw.try_lock() {
            return None;
        }
        let unlock = Unlock(&self.raw);
        // SAFETY: we hold the lock.
        let r = f(unsafe { &mut *self.value.get() });
        drop(unlock);
        Some(r)
    }

    /// Acquire the lock, run `f`, and keep holding it.
    ///
    /// The returned token must be passed to `park` from the same frame
    /// before its next suspension; park releases the lock once the frame is
    /// published. The lock must outlive that park.
    pub fn lock_for_park<R>(&self, f: impl FnOnce(&mut T) -> R) -> (LockToken, R) {
        self.raw.lock();
        let unlock = Unlock(&self.raw);
        // SAFETY: we hold the lock.
        let r = f(unsafe { &mut *self.value.get() });
        std::mem::forget(unlock);
        // SAFETY: the address of a held RawMutex is what `release_token` expects.
        let token = unsafe { LockToken::from_raw(&self.raw as *const RawMutex as usize) };
        (token, r)
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for RuntimeLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for RuntimeLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Unlocks on drop, so a panicking closure does not leave the lock held.
struct Unlock<'a>(&'a RawMutex);

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        // SAFETY: constructed only right after acquiring the lock.
        unsafe { self.0.unlock() };
    }
}

/// Release a lock held through a token from [`RuntimeLock::lock_for_park`].
///
/// This is the default park release hook. A `NONE` token is ignored.
///
/// # Safety
/// `token` must come from `lock_for_park` on a lock that is still alive and
/// still held by the current thread.
pub unsafe fn release_token(token: LockToken) {
    if token.is_none() {
        return;
    }
    let raw = &*(token.into_raw() as *const RawMutex);
    raw.unlock();
}
