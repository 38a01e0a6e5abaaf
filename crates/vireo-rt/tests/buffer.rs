// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Slice aliasing, growth and bounds behaviour.

mod common;

use vireo_rt::{Slice, Str};

#[test]
fn sub_slice_writes_are_visible_through_the_parent() {
    let a: Slice<i32> = (0..10).collect::<Vec<_>>().into();
    let b = a.slice(2, 6);
    b.set(1, 99);
    assert_eq!(a.get(3), 99);
    a.set(5, -5);
    assert_eq!(b.get(3), -5);
    assert!(a.shares_storage_with(&b));
}

#[test]
fn growth_past_capacity_detaches_the_view() {
    let mut a: Slice<i32> = Slice::alloc(4, 4);
    let b = a.slice(0, 4);
    a.push(1);
    assert!(!a.shares_storage_with(&b));
    a.set(0, 42);
    assert_eq!(b.get(0), 0);
    assert_eq!(a.len(), 5);
    assert_eq!(a.capacity(), 10);
}

#[test]
fn sequential_pushes_reallocate_logarithmically() {
    common::init_tracing();
    const N: usize = 100_000;
    let mut s: Slice<u32> = Slice::new();
    let mut reallocations = 0;
    let mut cap = s.capacity();
    for i in 0..N {
        s.push(i as u32);
        if s.capacity() != cap {
            reallocations += 1;
            cap = s.capacity();
        }
    }
    assert_eq!(s.len(), N);
    let bound = (usize::BITS - N.leading_zeros()) as usize + 1;
    assert!(reallocations <= bound, "{reallocations} reallocations for {N} pushes");
    assert_eq!(s.get((N - 1) as isize), (N - 1) as u32);
}

#[test]
#[cfg(not(feature = "unchecked"))]
#[should_panic(expected = "index out of range [3] with length 3")]
fn index_at_length_is_fatal() {
    let s: Slice<u8> = Slice::alloc(3, 8);
    s.get(3);
}

#[test]
#[cfg(not(feature = "unchecked"))]
#[should_panic(expected = "index out of range [-1] with length 3")]
fn negative_index_is_fatal() {
    let s: Slice<u8> = Slice::alloc(3, 8);
    s.get(-1);
}

#[test]
#[cfg(not(feature = "unchecked"))]
#[should_panic(expected = "slice bounds out of range [4:2]")]
fn reversed_slice_is_fatal() {
    let s: Slice<u8> = Slice::alloc(8, 8);
    s.slice(4, 2);
}

#[test]
#[cfg(not(feature = "unchecked"))]
#[should_panic(expected = "slice bounds out of range [0:9] with capacity 8")]
fn slice_past_capacity_is_fatal() {
    let s: Slice<u8> = Slice::alloc(2, 8);
    s.slice(0, 9);
}

#[test]
fn slicing_up_to_capacity_extends_the_view() {
    let s: Slice<u8> = Slice::alloc(2, 8);
    let wide = s.slice(0, 8);
    assert_eq!(wide.len(), 8);
    assert_eq!(wide.capacity(), 8);
}

#[test]
fn string_concat_always_copies() {
    let hello = Str::from("hello");
    let world = Str::from(" world");
    let joined = hello.concat(&world);
    assert_eq!(joined.as_string(), "hello world");
    assert!(!joined.shares_storage_with(&hello));

    let sub = joined.substr(6, 11);
    assert_eq!(sub.as_string(), "world");
    assert!(sub.shares_storage_with(&joined));

    let mut grown = sub.clone();
    grown.push_str("!");
    assert_eq!(grown.as_string(), "world!");
    assert!(!grown.shares_storage_with(&sub));
    assert_eq!(sub.as_string(), "world");
}
