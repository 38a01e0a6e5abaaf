// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-type descriptors for dynamic containers.
//!
//! A descriptor is a fixed table of function pointers over a type-erased
//! payload: dealloc, equality, hash, stringify. One descriptor exists per
//! concrete type; it is registered the first time that type is boxed and
//! lives for the rest of the process.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ptr::NonNull;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::ownership::{release_boxed, ReleaseFn};

/// Values that can be boxed in an `Any`.
pub trait Dynamic: Clone + PartialEq + Hash + fmt::Display + 'static {}

impl<T: Clone + PartialEq + Hash + fmt::Display + 'static> Dynamic for T {}

/// Function table for one concrete type.
pub struct TypeDescriptor {
    pub type_id: TypeId,
    pub name: &'static str,
    pub dealloc: ReleaseFn,
    pub eq: unsafe fn(NonNull<u8>, NonNull<u8>) -> bool,
    pub hash: unsafe fn(NonNull<u8>) -> u64,
    pub stringify: unsafe fn(NonNull<u8>) -> String,
}

impl TypeDescriptor {
    fn of<T: Dynamic>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            dealloc: release_boxed::<T>,
            eq: eq_erased::<T>,
            hash: hash_erased::<T>,
            stringify: stringify_erased::<T>,
        }
    }

    /// Does this descriptor describe `T`?
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Descriptor identity.
    #[inline]
    pub fn same_type(&self, other: &TypeDescriptor) -> bool {
        self.type_id == other.type_id
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

unsafe fn eq_erased<T: Dynamic>(a: NonNull<u8>, b: NonNull<u8>) -> bool {
    a.cast::<T>().as_ref() == b.cast::<T>().as_ref()
}

unsafe fn hash_erased<T: Dynamic>(p: NonNull<u8>) -> u64 {
    let mut hasher = DefaultHasher::new();
    p.cast::<T>().as_ref().hash(&mut hasher);
    hasher.finish()
}

unsafe fn stringify_erased<T: Dynamic>(p: NonNull<u8>) -> String {
    p.cast::<T>().as_ref().to_string()
}

type Registry = RwLock<HashMap<TypeId, &'static TypeDescriptor>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The descriptor for `T`, registering it on first use.
pub fn register<T: Dynamic>() -> &'static TypeDescriptor {
    let id = TypeId::of::<T>();
    if let Some(desc) = lookup(id) {
        return desc;
    }
    let mut map = registry().write();
    *map.entry(id).or_insert_with(|| {
        tracing::debug!(ty = type_name::<T>(), "register type descriptor");
        Box::leak(Box::new(TypeDescriptor::of::<T>()))
    })
}

/// A registered descriptor, if `type_id` has one.
pub fn lookup(type_id: TypeId) -> Option<&'static TypeDescriptor> {
    registry().read().get(&type_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Hash)]
    struct Meters(u32);

    impl fmt::Display for Meters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}m", self.0)
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let a = register::<Meters>();
        let b = register::<Meters>();
        assert!(std::ptr::eq(a, b));
        assert!(a.is::<Meters>());
        assert!(!a.is::<u32>());
        assert!(std::ptr::eq(lookup(TypeId::of::<Meters>()).unwrap(), a));
    }

    #[test]
    fn erased_functions_follow_the_type() {
        let desc = register::<Meters>();
        let x = Meters(3);
        let y = Meters(3);
        let z = Meters(4);
        let p = |m: &Meters| NonNull::from(m).cast::<u8>();
        unsafe {
            assert!((desc.eq)(p(&x), p(&y)));
            assert!(!(desc.eq)(p(&x), p(&z)));
            assert_eq!((desc.hash)(p(&x)), (desc.hash)(p(&y)));
            assert_eq!((desc.stringify)(p(&z)), "4m");
        }
    }

    #[test]
    fn distinct_types_get_distinct_descriptors() {
        let a = register::<i64>();
        let b = register::<String>();
        assert!(!a.same_type(b));
        assert_eq!(b.name, "alloc::string::String");
    }
}
