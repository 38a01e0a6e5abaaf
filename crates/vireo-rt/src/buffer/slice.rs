// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Growable, aliasable array views.
//!
//! A `Slice<T>` is `{ storage, cursor, len, cap }` over a backing store held
//! through a managed pointer. Sub-slicing shares the store and only bumps
//! its count: a write through one view is seen by every view that overlaps
//! it. Pushing past capacity moves the view to a fresh store of roughly
//! twice the needed size; views still on the old store stop seeing it.
//!
//! Element storage is always fully initialised with `T::default()`, so any
//! position below a view's capacity holds a valid value.

use std::cell::UnsafeCell;
use std::fmt;

use tracing::trace;

use crate::config;
use crate::error::{fatal, RuntimeError};
use crate::ownership::Ptr;

/// Backing store shared by every view over it.
pub(crate) struct Storage<T> {
    slots: Box<[UnsafeCell<T>]>,
}

impl<T: Default> Storage<T> {
    #[track_caller]
    fn with_capacity(capacity: usize) -> Self {
        let mut slots: Vec<UnsafeCell<T>> = Vec::new();
        if slots.try_reserve_exact(capacity).is_err() {
            fatal(RuntimeError::MemoryAllocationFailed {
                bytes: capacity.saturating_mul(std::mem::size_of::<T>()),
            });
        }
        slots.resize_with(capacity, || UnsafeCell::new(T::default()));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }
}

impl<T> Storage<T> {
    #[inline]
    fn slot(&self, pos: usize) -> &UnsafeCell<T> {
        &self.slots[pos]
    }
}

/// A view over a shared growable array.
pub struct Slice<T> {
    store: Ptr<Storage<T>>,
    cursor: usize,
    len: usize,
    cap: usize,
}

impl<T> Slice<T> {
    /// The nil slice: no storage, length and capacity 0.
    pub const fn new() -> Self {
        Self {
            store: Ptr::empty(),
            cursor: 0,
            len: 0,
            cap: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// True when both views sit on the same backing store.
    pub fn shares_storage_with(&self, other: &Slice<T>) -> bool {
        !self.store.is_empty() && self.store.ptr_eq(&other.store)
    }

    /// Holders of the backing store.
    pub fn storage_holders(&self) -> usize {
        self.store.strong_count()
    }

    #[inline]
    #[track_caller]
    fn check_index(&self, index: isize) -> usize {
        if config::SAFETY_CHECKS && (index < 0 || index as usize >= self.len) {
            fatal(RuntimeError::IndexOutOfRange {
                index,
                length: self.len,
            });
        }
        index as usize
    }

    #[inline]
    #[track_caller]
    fn slot(&self, pos: usize) -> &UnsafeCell<T> {
        self.store.get().slot(self.cursor + pos)
    }

    /// Overwrite the element at `index`.
    #[track_caller]
    pub fn set(&self, index: isize, value: T) {
        let pos = self.check_index(index);
        // SAFETY: views are single-threaded and no reference into the store
        // outlives a call.
        unsafe { *self.slot(pos).get() = value };
    }

    /// A view over `[start, end)` sharing this view's storage.
    #[track_caller]
    pub fn slice(&self, start: isize, end: isize) -> Slice<T> {
        if config::SAFETY_CHECKS && (start < 0 || end < start || end as usize > self.cap) {
            fatal(RuntimeError::SlicingOutOfRange {
                start,
                end,
                capacity: self.cap,
            });
        }
        let (start, end) = (start as usize, end as usize);
        Slice {
            store: self.store.clone(),
            cursor: self.cursor + start,
            len: end - start,
            cap: self.cap - start,
        }
    }

    /// The same view with its capacity cut down to its length.
    pub(crate) fn clamped(&self) -> Slice<T> {
        Slice {
            cap: self.len,
            ..self.clone()
        }
    }
}

impl<T: Clone + Default> Slice<T> {
    /// Allocate `capacity` elements, the first `length` of them in view.
    #[track_caller]
    pub fn alloc(length: isize, capacity: isize) -> Self {
        if length < 0 || length > capacity {
            fatal(RuntimeError::AllocationRange { length, capacity });
        }
        let (length, capacity) = (length as usize, capacity as usize);
        if capacity == 0 {
            return Self::new();
        }
        Self {
            store: Ptr::make_owned(Storage::with_capacity(capacity)),
            cursor: 0,
            len: length,
            cap: capacity,
        }
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        let mut slice = Self::alloc(0, values.len() as isize);
        for value in values {
            slice.push_unchecked(value);
        }
        slice
    }

    /// Copy of the element at `index`.
    #[track_caller]
    pub fn get(&self, index: isize) -> T {
        let pos = self.check_index(index);
        // SAFETY: see `set`.
        unsafe { (*self.slot(pos).get()).clone() }
    }

    pub fn push(&mut self, value: T) {
        self.reserve(1);
        self.push_unchecked(value);
    }

    /// Append every element of `other`.
    pub fn append(&mut self, other: &Slice<T>) {
        // `other` may alias self; read it out before growing.
        let values = other.to_vec();
        self.extend_from(&values);
    }

    pub fn extend_from(&mut self, values: &[T]) {
        self.reserve(values.len());
        for value in values {
            self.push_unchecked(value.clone());
        }
    }

    /// Copy `min(len, src.len)` elements from `src` to the front of this
    /// view. Overlapping views copy as if through a temporary.
    pub fn copy_from(&self, src: &Slice<T>) -> usize {
        let n = self.len.min(src.len);
        let values: Vec<T> = (0..n).map(|i| src.get(i as isize)).collect();
        for (i, value) in values.into_iter().enumerate() {
            // SAFETY: i < n <= self.len.
            unsafe { *self.slot(i).get() = value };
        }
        n
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Iterate over copies of the elements.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { slice: self, pos: 0 }
    }

    /// Make room for `additional` more elements, moving to a new store of
    /// `2 * (len + additional)` when the current one is too small.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed <= self.cap {
            return;
        }
        let new_cap = 2 * needed;
        let fresh = Storage::with_capacity(new_cap);
        let unique = self.store.strong_count() == 1;
        for i in 0..self.len {
            // SAFETY: i < len <= cap, and `fresh` is not shared yet.
            unsafe {
                let old = self.slot(i).get();
                *fresh.slot(i).get() = if unique {
                    std::mem::take(&mut *old)
                } else {
                    (*old).clone()
                };
            }
        }
        trace!(old_cap = self.cap, new_cap, len = self.len, "slice grow");
        // Rebinding drops our hold on the old store.
        self.store = Ptr::make_owned(fresh);
        self.cursor = 0;
        self.cap = new_cap;
    }

    fn push_unchecked(&mut self, value: T) {
        debug_assert!(self.len < self.cap);
        // SAFETY: len < cap, so the slot is inside the store.
        unsafe { *self.slot(self.len).get() = value };
        self.len += 1;
    }
}

impl<T> Clone for Slice<T> {
    /// Another view over the same storage.
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cursor: self.cursor,
            len: self.len,
            cap: self.cap,
        }
    }
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default + fmt::Debug> fmt::Debug for Slice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Clone + Default + PartialEq> PartialEq for Slice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Clone + Default> From<Vec<T>> for Slice<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

/// Iterator over copies of a slice's elements.
pub struct Iter<'a, T> {
    slice: &'a Slice<T>,
    pos: usize,
}

impl<T: Clone + Default> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.pos >= self.slice.len {
            return None;
        }
        let value = self.slice.get(self.pos as isize);
        self.pos += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.slice.len - self.pos;
        (rest, Some(rest))
    }
}
