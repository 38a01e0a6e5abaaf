// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Exact-once release of managed pointers under arbitrary copy/drop sequences.
#![cfg(not(feature = "no-refcount"))]

mod common;

use proptest::prelude::*;
use vireo_rt::Ptr;

use common::{Live, LiveCounter};

#[derive(Debug, Clone)]
enum Op {
    Copy(usize),
    Drop(usize),
    Assign(usize, usize),
    Project(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..8usize).prop_map(Op::Copy),
        (0..8usize).prop_map(Op::Drop),
        (0..8usize, 0..8usize).prop_map(|(a, b)| Op::Assign(a, b)),
        (0..8usize).prop_map(Op::Project),
    ]
}

struct Payload {
    _live: Live,
    tag: u32,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn payload_freed_exactly_once_after_last_holder(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let counter = LiveCounter::default();
        let mut holders: Vec<Ptr<Payload>> = vec![Ptr::make_owned(Payload { _live: counter.token(), tag: 7 })];
        let mut fields: Vec<Ptr<u32>> = Vec::new();

        for op in ops {
            match op {
                Op::Copy(i) if !holders.is_empty() => {
                    let p = holders[i % holders.len()].clone();
                    holders.push(p);
                }
                Op::Drop(i) if !holders.is_empty() => {
                    holders.swap_remove(i % holders.len());
                }
                Op::Assign(a, b) if !holders.is_empty() => {
                    let src = holders[b % holders.len()].clone();
                    let n = holders.len();
                    holders[a % n].assign(&src);
                }
                Op::Project(i) if !holders.is_empty() => {
                    let f = holders[i % holders.len()].project(|p| &p.tag);
                    fields.push(f);
                }
                _ => {}
            }
            let holding = holders.len() + fields.len();
            prop_assert_eq!(counter.live(), usize::from(holding > 0));
            if let Some(p) = holders.first() {
                prop_assert_eq!(p.strong_count(), holding);
                prop_assert_eq!(p.tag, 7);
            }
        }

        holders.clear();
        for f in &fields {
            prop_assert_eq!(**f, 7);
        }
        fields.clear();
        prop_assert_eq!(counter.live(), 0);
    }
}

#[test]
fn self_assignment_through_alias_keeps_payload() {
    let counter = LiveCounter::default();
    let mut a = Ptr::make_owned(Payload { _live: counter.token(), tag: 1 });
    let alias = a.clone();
    let before = a.strong_count();
    a.assign(&alias);
    drop(alias);
    assert_eq!(a.strong_count(), before - 1);
    assert_eq!(counter.live(), 1);
    assert_eq!(a.tag, 1);
    drop(a);
    assert_eq!(counter.live(), 0);
}
