// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Exact reference-counted ownership.
//!
//! - `cell`: the standalone counter, freed exactly once at zero
//! - `ptr`: managed pointers (owning or borrowed) built on it

pub mod cell;
pub mod ptr;

pub use cell::{OwnershipCell, ReleaseFn};
pub use ptr::{release_boxed, Ptr, RawPtr};
