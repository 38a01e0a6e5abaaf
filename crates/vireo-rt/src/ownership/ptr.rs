// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Managed pointers.
//!
//! A managed pointer pairs a payload address with an optional ownership
//! cell. With a cell it is one holder of the payload; without one it is a
//! borrowed view that never frees. `RawPtr` is the untyped form used by the
//! containers, `Ptr<T>` the typed one handed to generated code.
//!
//! Copies go through the cell's increment, drops through its decrement. The
//! payload is freed by whichever drop takes the count to zero.
//!
//! Reference counting does not see cycles. A structure with a possible cycle
//! keeps its back edges as [`Ptr::back_ref`] views, or lives in an arena
//! under the `no-refcount` build.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use super::cell::{OwnershipCell, ReleaseFn};
use crate::config;
use crate::error::invalid_memory;

/// Untyped managed pointer.
pub struct RawPtr {
    payload: Option<NonNull<u8>>,
    cell: Option<NonNull<OwnershipCell>>,
}

impl RawPtr {
    /// The empty pointer.
    pub const fn empty() -> Self {
        Self {
            payload: None,
            cell: None,
        }
    }

    /// Bind a fresh cell at count 1 to the allocation at `base`.
    ///
    /// Under `no-refcount` no cell is created and the allocation is never
    /// freed by this layer.
    ///
    /// # Safety
    /// `release(base)` must be a correct way to free the allocation, and
    /// nothing else may free it.
    pub unsafe fn make_owned(base: NonNull<u8>, release: ReleaseFn) -> Self {
        if !config::REFCOUNTING {
            return Self::borrowed(base);
        }
        Self {
            payload: Some(base),
            cell: Some(OwnershipCell::allocate(base, release)),
        }
    }

    /// Attach to a cell another holder already owns.
    ///
    /// # Safety
    /// `cell`, if present, must be live, and `payload` must stay valid for
    /// as long as that cell is.
    pub unsafe fn make_shared(payload: NonNull<u8>, cell: Option<NonNull<OwnershipCell>>) -> Self {
        if let Some(cell) = cell {
            OwnershipCell::retain(cell);
        }
        Self {
            payload: Some(payload),
            cell,
        }
    }

    /// A non-owning view.
    pub const fn borrowed(payload: NonNull<u8>) -> Self {
        Self {
            payload: Some(payload),
            cell: None,
        }
    }

    pub fn payload(&self) -> Option<NonNull<u8>> {
        self.payload
    }

    pub fn cell(&self) -> Option<NonNull<OwnershipCell>> {
        self.cell
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// True when this pointer holds a count on its payload.
    pub fn is_owned(&self) -> bool {
        self.cell.is_some()
    }

    /// Holders of the payload, or 0 for borrowed and empty pointers.
    pub fn strong_count(&self) -> usize {
        match self.cell {
            // SAFETY: we hold a count, so the cell is live.
            Some(cell) => unsafe { cell.as_ref().count() },
            None => 0,
        }
    }

    /// Same payload address.
    pub fn ptr_eq(&self, other: &RawPtr) -> bool {
        self.payload == other.payload
    }

    /// Checked payload address.
    #[inline]
    #[track_caller]
    pub fn expect_payload(&self, what: &'static str) -> NonNull<u8> {
        match self.payload {
            Some(p) => p,
            None => invalid_memory(what),
        }
    }

    /// Rebind to `src`'s payload.
    ///
    /// Binding a pointer to the payload it already holds is a no-op, so the
    /// old binding is never dropped out from under the new one.
    pub fn assign(&mut self, src: &RawPtr) {
        if self.payload == src.payload {
            return;
        }
        let adopted = src.clone();
        self.reset();
        *self = adopted;
    }

    /// Drop the binding and become empty.
    pub fn reset(&mut self) {
        if let Some(cell) = self.cell.take() {
            // SAFETY: we held one count on the live cell.
            unsafe {
                OwnershipCell::release(cell);
            }
        }
        self.payload = None;
    }
}

impl Clone for RawPtr {
    fn clone(&self) -> Self {
        if let Some(cell) = self.cell {
            // SAFETY: our own count keeps the cell live.
            unsafe { OwnershipCell::retain(cell) };
        }
        Self {
            payload: self.payload,
            cell: self.cell,
        }
    }
}

impl Drop for RawPtr {
    fn drop(&mut self) {
        self.reset();
    }
}

impl Default for RawPtr {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RawPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPtr")
            .field("payload", &self.payload)
            .field("count", &self.strong_count())
            .finish()
    }
}

/// Release routine for a payload allocated with `Box<T>`.
///
/// # Safety
/// `base` must come from `Box::<T>::into_raw` and not have been freed.
pub unsafe fn release_boxed<T>(base: NonNull<u8>) {
    drop(Box::from_raw(base.cast::<T>().as_ptr()));
}

/// Typed managed pointer.
pub struct Ptr<T> {
    raw: RawPtr,
    _marker: PhantomData<T>,
}

#[cfg(feature = "atomic-rc")]
unsafe impl<T: Send + Sync> Send for Ptr<T> {}
#[cfg(feature = "atomic-rc")]
unsafe impl<T: Send + Sync> Sync for Ptr<T> {}

impl<T> Ptr<T> {
    pub const fn empty() -> Self {
        Self {
            raw: RawPtr::empty(),
            _marker: PhantomData,
        }
    }

    /// Move `value` to the heap behind a fresh cell.
    pub fn make_owned(value: T) -> Self {
        let base = NonNull::from(Box::leak(Box::new(value))).cast::<u8>();
        Self {
            // SAFETY: `base` came from a Box<T>, which release_boxed frees.
            raw: unsafe { RawPtr::make_owned(base, release_boxed::<T>) },
            _marker: PhantomData,
        }
    }

    /// A borrowed view of memory owned elsewhere.
    ///
    /// # Safety
    /// `payload` must stay valid for as long as the view is dereferenced.
    pub unsafe fn from_borrowed(payload: NonNull<T>) -> Self {
        Self {
            raw: RawPtr::borrowed(payload.cast::<u8>()),
            _marker: PhantomData,
        }
    }

    /// Wrap an untyped pointer.
    ///
    /// # Safety
    /// `raw` must be empty or point at a valid `T`.
    pub unsafe fn from_raw(raw: RawPtr) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn into_raw(self) -> RawPtr {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the count moves with the read.
        unsafe { std::ptr::read(&this.raw) }
    }

    pub fn as_raw(&self) -> &RawPtr {
        &self.raw
    }

    /// A non-owning view of the same payload, for back edges that would
    /// otherwise form an ownership cycle.
    ///
    /// # Safety
    /// Some owning holder must outlive every dereference of the view.
    pub unsafe fn back_ref(&self) -> Ptr<T> {
        match self.raw.payload() {
            Some(p) => Ptr::from_borrowed(p.cast::<T>()),
            None => Ptr::empty(),
        }
    }

    /// A pointer to part of the payload that shares this pointer's cell.
    #[track_caller]
    pub fn project<U>(&self, f: impl FnOnce(&T) -> &U) -> Ptr<U> {
        let field = NonNull::from(f(self.get())).cast::<u8>();
        Ptr {
            // SAFETY: the field lives inside the allocation the cell guards.
            raw: unsafe { RawPtr::make_shared(field, self.raw.cell()) },
            _marker: PhantomData,
        }
    }

    /// Checked dereference.
    #[inline]
    #[track_caller]
    pub fn get(&self) -> &T {
        let p = self.raw.expect_payload("managed pointer");
        // SAFETY: a non-empty pointer always names a live `T`.
        unsafe { p.cast::<T>().as_ref() }
    }

    /// Mutable access when this is the only holder.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.raw.strong_count() != 1 {
            return None;
        }
        let p = self.raw.payload()?;
        // SAFETY: sole holder, and `&mut self` excludes other borrows.
        Some(unsafe { p.cast::<T>().as_mut() })
    }

    /// Mutable access regardless of other holders.
    ///
    /// # Safety
    /// No other reference to the payload may be live while the result is.
    #[track_caller]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        self.raw.expect_payload("managed pointer").cast::<T>().as_mut()
    }

    pub fn as_ptr(&self) -> *const T {
        self.raw
            .payload()
            .map_or(std::ptr::null(), |p| p.cast::<T>().as_ptr() as *const T)
    }

    /// Rebind to `src`'s payload; self-assignment is a no-op.
    pub fn assign(&mut self, src: &Ptr<T>) {
        self.raw.assign(&src.raw);
    }

    pub fn reset(&mut self) {
        self.raw.reset();
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn is_owned(&self) -> bool {
        self.raw.is_owned()
    }

    pub fn strong_count(&self) -> usize {
        self.raw.strong_count()
    }

    pub fn ptr_eq(&self, other: &Ptr<T>) -> bool {
        self.raw.ptr_eq(&other.raw)
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Ptr<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Ptr(<empty>)");
        }
        f.debug_struct("Ptr")
            .field("value", self.get())
            .field("count", &self.strong_count())
            .finish()
    }
}
