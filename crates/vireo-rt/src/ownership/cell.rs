// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ownership cell: the standalone counter behind every owning pointer.
//!
//! One cell is allocated per logical value. It remembers the base address of
//! the allocation it guards and the routine that releases it, so pointers to
//! the interior of that allocation can share the cell and still free the
//! right thing.

use std::ptr::NonNull;

/// Releases a guarded allocation, given its base address.
pub type ReleaseFn = unsafe fn(NonNull<u8>);

#[cfg(not(feature = "atomic-rc"))]
struct Counter(std::cell::Cell<usize>);

#[cfg(not(feature = "atomic-rc"))]
impl Counter {
    fn new(n: usize) -> Self {
        Self(std::cell::Cell::new(n))
    }

    #[inline]
    fn get(&self) -> usize {
        self.0.get()
    }

    #[inline]
    fn increment(&self) {
        let n = self.0.get();
        if n == usize::MAX {
            std::process::abort();
        }
        self.0.set(n + 1);
    }

    /// True when this decrement reached zero.
    #[inline]
    fn decrement(&self) -> bool {
        let n = self.0.get() - 1;
        self.0.set(n);
        n == 0
    }
}

#[cfg(feature = "atomic-rc")]
struct Counter(std::sync::atomic::AtomicUsize);

#[cfg(feature = "atomic-rc")]
impl Counter {
    fn new(n: usize) -> Self {
        Self(std::sync::atomic::AtomicUsize::new(n))
    }

    #[inline]
    fn get(&self) -> usize {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }

    #[inline]
    fn increment(&self) {
        let prev = self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if prev > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// True when this decrement reached zero.
    #[inline]
    fn decrement(&self) -> bool {
        use std::sync::atomic::{fence, Ordering};
        if self.0.fetch_sub(1, Ordering::Release) != 1 {
            return false;
        }
        fence(Ordering::Acquire);
        true
    }
}

/// Heap counter guarding one allocation.
pub struct OwnershipCell {
    count: Counter,
    base: NonNull<u8>,
    release: ReleaseFn,
}

impl OwnershipCell {
    /// Allocate a cell at count 1 guarding the allocation at `base`.
    pub(crate) fn allocate(base: NonNull<u8>, release: ReleaseFn) -> NonNull<OwnershipCell> {
        let cell = Box::new(OwnershipCell {
            count: Counter::new(1),
            base,
            release,
        });
        NonNull::from(Box::leak(cell))
    }

    /// Current number of holders.
    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// Add a holder.
    ///
    /// # Safety
    /// `cell` must be live, i.e. some holder still owns it.
    #[inline]
    pub(crate) unsafe fn retain(cell: NonNull<OwnershipCell>) {
        cell.as_ref().count.increment();
    }

    /// Drop a holder. When this was the last one the guarded allocation and
    /// the cell are both freed before returning `true`.
    ///
    /// # Safety
    /// `cell` must be live and the caller must own one of its holds.
    #[inline]
    pub(crate) unsafe fn release(cell: NonNull<OwnershipCell>) -> bool {
        if !cell.as_ref().count.decrement() {
            return false;
        }
        let OwnershipCell { base, release, .. } = *Box::from_raw(cell.as_ptr());
        release(base);
        true
    }
}
