// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Dynamic containers: `Any` round trips and trait-object masking.

use std::ptr::NonNull;
use std::sync::OnceLock;

use vireo_rt::dynamic::{CapabilityTable, ViewId};
use vireo_rt::{Any, Ptr, TraitObj};

#[test]
fn boxed_integer_casts_back() {
    let a = Any::new(42i32);
    assert_eq!(a.cast::<i32>(), 42);
    let p: Ptr<i32> = a.cast_ptr();
    assert_eq!(*p, 42);
}

#[test]
#[should_panic(expected = "incompatible type: expected `alloc::string::String`, found `i32`")]
fn boxed_integer_does_not_cast_to_string() {
    let a = Any::new(42i32);
    let _ = a.cast::<String>();
}

#[test]
#[cfg(not(feature = "no-refcount"))]
fn payload_freed_with_last_container() {
    #[derive(Clone, PartialEq, Hash)]
    struct Tagged(u8, std::sync::Arc<()>);

    impl std::fmt::Display for Tagged {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "tag {}", self.0)
        }
    }

    let marker = std::sync::Arc::new(());
    let a = Any::new(Tagged(1, marker.clone()));
    let b = a.clone();
    assert_eq!(std::sync::Arc::strong_count(&marker), 2);
    drop(a);
    assert_eq!(b.to_string(), "tag 1");
    drop(b);
    assert_eq!(std::sync::Arc::strong_count(&marker), 1);
}

struct Speak {
    speak: unsafe fn(NonNull<u8>) -> String,
}

struct Count {
    legs: unsafe fn(NonNull<u8>) -> u32,
}

#[derive(Clone)]
struct Dog(String);

#[derive(Clone)]
struct Fish;

unsafe fn dog_speak(p: NonNull<u8>) -> String {
    format!("{} says woof", p.cast::<Dog>().as_ref().0)
}

unsafe fn dog_legs(_: NonNull<u8>) -> u32 {
    4
}

unsafe fn fish_legs(_: NonNull<u8>) -> u32 {
    0
}

static DOG_SPEAK: Speak = Speak { speak: dog_speak };
static DOG_COUNT: Count = Count { legs: dog_legs };
static FISH_COUNT: Count = Count { legs: fish_legs };

struct Views {
    table: &'static CapabilityTable,
    speak: ViewId,
    count: ViewId,
}

fn views() -> &'static Views {
    static VIEWS: OnceLock<Views> = OnceLock::new();
    VIEWS.get_or_init(|| {
        let mut b = CapabilityTable::builder();
        let speak = b.view("Speak");
        let count = b.view("Count");
        b.implement::<Dog, _>(speak, &DOG_SPEAK)
            .implement::<Dog, _>(count, &DOG_COUNT)
            .implement::<Fish, _>(count, &FISH_COUNT);
        Views {
            table: b.build(),
            speak,
            count,
        }
    })
}

#[test]
fn mask_reprojects_without_copying() {
    let v = views();
    let offset = v.table.offset_of::<Dog>(v.speak).unwrap();
    let speaker = TraitObj::new(v.table, offset, Dog("rex".into()));
    let said = speaker.call(|t: &Speak, d| unsafe { (t.speak)(d) });
    assert_eq!(said, "rex says woof");

    let counter = speaker.mask(v.count);
    assert!(counter.ptr_eq(&speaker));
    assert_eq!(counter.call(|t: &Count, d| unsafe { (t.legs)(d) }), 4);
    assert_eq!(counter.cast::<Dog>().0, "rex");
}

#[test]
fn types_without_a_view_cannot_mask_to_it() {
    let v = views();
    let offset = v.table.offset_of::<Fish>(v.count).unwrap();
    let fish = TraitObj::new(v.table, offset, Fish);
    assert_eq!(fish.call(|t: &Count, d| unsafe { (t.legs)(d) }), 0);
    assert!(fish.try_mask(v.speak).is_none());
    assert!(v.table.offset_of::<Fish>(v.speak).is_none());
}
