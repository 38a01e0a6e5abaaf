// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Type-erased containers.
//!
//! - `descriptor`: per-type dealloc/eq/hash/stringify tables
//! - `any`: `Any`, a boxed value tagged with its descriptor
//! - `trait_obj`: `TraitObj`, dispatch and re-projection by type offset

pub mod any;
pub mod descriptor;
pub mod trait_obj;

pub use self::any::Any;
pub use self::descriptor::{lookup, register, Dynamic, TypeDescriptor};
pub use self::trait_obj::{CapabilityTable, CapabilityTableBuilder, TraitObj, TypeOffset, ViewId};
