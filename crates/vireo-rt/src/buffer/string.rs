// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Immutable byte strings.
//!
//! `Str` is a byte slice whose contents never change in place. Substrings
//! share storage; append and concat always build a fresh store, so a
//! substring can never observe a later append.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::slice::Slice;

#[derive(Clone, Default)]
pub struct Str {
    bytes: Slice<u8>,
}

impl Str {
    pub const fn new() -> Self {
        Self {
            bytes: Slice::new(),
        }
    }

    /// Copy `bytes` into a fresh store.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut store = Slice::alloc(0, bytes.len() as isize);
        store.extend_from(bytes);
        Self { bytes: store }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[track_caller]
    pub fn byte_at(&self, index: isize) -> u8 {
        self.bytes.get(index)
    }

    /// Bytes `[start, end)`, sharing storage with `self`.
    #[track_caller]
    pub fn substr(&self, start: isize, end: isize) -> Str {
        // Capacity is clamped to length on both sides so a substring never
        // reaches past the bytes it was cut from.
        Self {
            bytes: self.bytes.clamped().slice(start, end).clamped(),
        }
    }

    /// `self + other` in a fresh store.
    pub fn concat(&self, other: &Str) -> Str {
        let mut store = Slice::alloc(0, (self.len() + other.len()) as isize);
        store.append(&self.bytes);
        store.append(&other.bytes);
        Self { bytes: store }
    }

    pub fn append(&mut self, other: &Str) {
        *self = self.concat(other);
    }

    pub fn push_str(&mut self, s: &str) {
        self.append(&Str::from(s));
    }

    pub fn shares_storage_with(&self, other: &Str) -> bool {
        self.bytes.shares_storage_with(&other.bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Decode as UTF-8, replacing invalid sequences.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_string())
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Str {}

impl PartialOrd for Str {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Str {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.iter().cmp(other.bytes.iter())
    }
}

impl Hash for Str {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.to_bytes());
        state.write_u8(0xff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_text() {
        let s = Str::from("hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.as_string(), "hello");
        assert_eq!(s.byte_at(1), b'e');
    }

    #[test]
    fn substr_shares_storage() {
        let s = Str::from("hello world");
        let w = s.substr(6, 11);
        assert_eq!(w.to_string(), "world");
        assert!(w.shares_storage_with(&s));
    }

    #[test]
    fn append_copies_into_fresh_store() {
        let mut s = Str::from("abc");
        let sub = s.substr(0, 2);
        s.push_str("def");
        assert_eq!(s.to_string(), "abcdef");
        assert_eq!(sub.to_string(), "ab");
        assert!(!s.shares_storage_with(&sub));
    }

    #[test]
    #[cfg(not(feature = "unchecked"))]
    #[should_panic(expected = "slice bounds out of range [0:4] with capacity 2")]
    fn nested_substr_is_bounded_by_its_own_length() {
        let s = Str::from("hello");
        s.substr(1, 3).substr(0, 4);
    }

    #[test]
    fn concat_leaves_operands_alone() {
        let a = Str::from("foo");
        let b = Str::from("bar");
        let c = a.concat(&b);
        assert_eq!(c.to_string(), "foobar");
        assert_eq!(a.to_string(), "foo");
        assert_eq!(b.to_string(), "bar");
    }

    #[test]
    fn ordering_and_equality_are_bytewise() {
        assert_eq!(Str::from("abc"), Str::from("abc"));
        assert!(Str::from("abc") < Str::from("abd"));
        assert!(Str::from("ab") < Str::from("abc"));
        assert_eq!(Str::from("xabcx").substr(1, 4), Str::from("abc"));
    }

    #[test]
    #[cfg(not(feature = "unchecked"))]
    #[should_panic(expected = "slice bounds out of range [0:4] with capacity 3")]
    fn substr_cannot_reach_past_length() {
        Str::from("abc").substr(0, 4);
    }
}
