// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Growable buffers built on managed pointers.
//!
//! - `slice`: aliasable, capacity-doubling array views
//! - `string`: immutable byte strings over the same views

pub mod slice;
pub mod string;

pub use self::slice::{Iter, Slice};
pub use self::string::Str;
