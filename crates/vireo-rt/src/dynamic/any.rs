// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `Any`: a boxed value of any registered type.
//!
//! The payload lives behind an owning managed pointer and is tagged with
//! its type descriptor. Copies share the payload. The descriptor is present
//! exactly when the payload is, so an empty container is one state.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use super::descriptor::{register, Dynamic, TypeDescriptor};
use crate::error::{fatal, invalid_memory, RuntimeError};
use crate::ownership::{Ptr, RawPtr};

/// Type-erased shared value.
#[derive(Clone, Default)]
pub struct Any {
    ptr: RawPtr,
    desc: Option<&'static TypeDescriptor>,
}

impl Any {
    /// Box `value` behind a fresh cell.
    pub fn new<T: Dynamic>(value: T) -> Self {
        let desc = register::<T>();
        let base = NonNull::from(Box::leak(Box::new(value))).cast::<u8>();
        Self {
            // SAFETY: `base` came from a Box<T>; desc.dealloc is release_boxed::<T>.
            ptr: unsafe { RawPtr::make_owned(base, desc.dealloc) },
            desc: Some(desc),
        }
    }

    pub const fn empty() -> Self {
        Self {
            ptr: RawPtr::empty(),
            desc: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_none()
    }

    /// Does the container hold a `T`?
    pub fn is<T: 'static>(&self) -> bool {
        self.desc.is_some_and(TypeDescriptor::is::<T>)
    }

    pub fn descriptor(&self) -> Option<&'static TypeDescriptor> {
        self.desc
    }

    /// Name of the stored type, if any.
    pub fn type_name(&self) -> Option<&'static str> {
        self.desc.map(|d| d.name)
    }

    pub fn strong_count(&self) -> usize {
        self.ptr.strong_count()
    }

    #[track_caller]
    fn checked<T: 'static>(&self) -> NonNull<T> {
        let Some(desc) = self.desc else {
            invalid_memory("dynamic container");
        };
        if !desc.is::<T>() {
            fatal(RuntimeError::IncompatibleType {
                expected: type_name::<T>(),
                found: desc.name,
            });
        }
        self.ptr.expect_payload("dynamic container").cast::<T>()
    }

    /// Checked downcast returning a copy of the payload.
    #[track_caller]
    pub fn cast<T: Dynamic>(&self) -> T {
        // SAFETY: the descriptor matched, so the payload is a live `T`.
        unsafe { self.checked::<T>().as_ref().clone() }
    }

    /// Downcast without raising: `None` when empty or of another type.
    pub fn try_cast<T: Dynamic>(&self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        let p = self.ptr.payload()?.cast::<T>();
        // SAFETY: as in `cast`.
        Some(unsafe { p.as_ref().clone() })
    }

    /// Checked downcast to a pointer sharing the payload.
    #[track_caller]
    pub fn cast_ptr<T: Dynamic>(&self) -> Ptr<T> {
        self.checked::<T>();
        // SAFETY: the payload is a live `T` and the clone carries our count.
        unsafe { Ptr::from_raw(self.ptr.clone()) }
    }

    /// Same payload address.
    pub fn ptr_eq(&self, other: &Any) -> bool {
        self.ptr.ptr_eq(&other.ptr)
    }
}

impl PartialEq for Any {
    fn eq(&self, other: &Any) -> bool {
        match (self.desc, other.desc) {
            (None, None) => true,
            (Some(a), Some(b)) if a.same_type(b) => match (self.ptr.payload(), other.ptr.payload()) {
                // SAFETY: both payloads are live values of the descriptor's type.
                (Some(x), Some(y)) => x == y || unsafe { (a.eq)(x, y) },
                _ => false,
            },
            _ => false,
        }
    }
}

impl Eq for Any {}

impl Hash for Any {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match (self.desc, self.ptr.payload()) {
            // SAFETY: payload is a live value of the descriptor's type.
            (Some(desc), Some(p)) => unsafe { (desc.hash)(p) }.hash(state),
            _ => 0u64.hash(state),
        }
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.desc, self.ptr.payload()) {
            // SAFETY: as in Hash.
            (Some(desc), Some(p)) => f.write_str(&unsafe { (desc.stringify)(p) }),
            _ => f.write_str("<nil>"),
        }
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.desc {
            Some(desc) => write!(f, "Any<{}>({})", desc.name, self),
            None => f.write_str("Any(<nil>)"),
        }
    }
}
