// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Trait objects dispatched by type offset.
//!
//! A capability table is laid out as one row per concrete type and one
//! column per interface view. A type offset is a flat index into that grid,
//! so it names a concrete-type × view pairing directly. Dispatch reads the
//! slot at the object's offset; re-projecting onto another view of the same
//! value is `row * views + view`. Neither walks any type list.
//!
//! Offsets are fixed when the table is built. Code that constructs objects
//! looks its offsets up once with [`CapabilityTable::offset_of`] and keeps
//! them.

use std::any::{type_name, Any as StdAny, TypeId};
use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::{fatal, invalid_memory, RuntimeError};
use crate::ownership::{release_boxed, Ptr, RawPtr, ReleaseFn};

/// An interface view: one column of a capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u32);

impl ViewId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A concrete-type × view pairing: one slot of a capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeOffset(u32);

impl TypeOffset {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Row {
    concrete: TypeId,
    name: &'static str,
    dealloc: ReleaseFn,
}

/// Frozen dispatch grid.
pub struct CapabilityTable {
    views: Vec<&'static str>,
    rows: Vec<Row>,
    slots: Vec<Option<&'static (dyn StdAny + Send + Sync)>>,
}

impl CapabilityTable {
    pub fn builder() -> CapabilityTableBuilder {
        CapabilityTableBuilder::default()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn view_name(&self, view: ViewId) -> &'static str {
        self.views.get(view.index()).copied().unwrap_or("<unknown view>")
    }

    /// Flat slot index for `row` and `view`, if `view` is a column here.
    #[inline]
    fn slot_index(&self, row: usize, view: ViewId) -> Option<usize> {
        let width = self.views.len();
        if view.index() >= width {
            return None;
        }
        let flat = row * width + view.index();
        self.slots[flat].map(|_| flat)
    }

    /// The offset for `T` seen through `view`, if `T` implements it.
    pub fn offset_of<T: 'static>(&self, view: ViewId) -> Option<TypeOffset> {
        let row = self.rows.iter().position(|r| r.concrete == TypeId::of::<T>())?;
        self.slot_index(row, view).map(|flat| TypeOffset(flat as u32))
    }

    #[inline]
    fn row(&self, offset: TypeOffset) -> &Row {
        &self.rows[offset.index() / self.views.len()]
    }

    #[inline]
    fn view_of(&self, offset: TypeOffset) -> ViewId {
        ViewId((offset.index() % self.views.len()) as u32)
    }

    /// Same concrete type, other view. `None` when the type does not
    /// implement `view` or `view` is not a column of this table.
    #[inline]
    pub fn remap(&self, offset: TypeOffset, view: ViewId) -> Option<TypeOffset> {
        let row = offset.index() / self.views.len();
        self.slot_index(row, view).map(|flat| TypeOffset(flat as u32))
    }

    pub fn concrete_name(&self, offset: TypeOffset) -> &'static str {
        self.row(offset).name
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("views", &self.views)
            .field("types", &self.rows.iter().map(|r| r.name).collect::<Vec<_>>())
            .finish()
    }
}

struct Implementation {
    concrete: TypeId,
    name: &'static str,
    dealloc: ReleaseFn,
    view: ViewId,
    vtable: &'static (dyn StdAny + Send + Sync),
}

/// Collects views and implementations, then freezes them into a table.
#[derive(Default)]
pub struct CapabilityTableBuilder {
    views: Vec<&'static str>,
    impls: Vec<Implementation>,
}

impl CapabilityTableBuilder {
    /// Declare an interface view.
    pub fn view(&mut self, name: &'static str) -> ViewId {
        self.views.push(name);
        ViewId((self.views.len() - 1) as u32)
    }

    /// Record that `T` implements `view` through `vtable`.
    pub fn implement<T: 'static, V: Send + Sync + 'static>(
        &mut self,
        view: ViewId,
        vtable: &'static V,
    ) -> &mut Self {
        self.impls.push(Implementation {
            concrete: TypeId::of::<T>(),
            name: type_name::<T>(),
            dealloc: release_boxed::<T>,
            view,
            vtable,
        });
        self
    }

    /// Freeze the grid. Tables live for the rest of the process.
    pub fn build(self) -> &'static CapabilityTable {
        let mut rows: Vec<Row> = Vec::new();
        let mut placed = Vec::with_capacity(self.impls.len());
        for imp in &self.impls {
            let row = match rows.iter().position(|r| r.concrete == imp.concrete) {
                Some(row) => row,
                None => {
                    rows.push(Row {
                        concrete: imp.concrete,
                        name: imp.name,
                        dealloc: imp.dealloc,
                    });
                    rows.len() - 1
                }
            };
            placed.push((row, imp.view, imp.vtable));
        }

        let width = self.views.len();
        let mut slots = vec![None; rows.len() * width];
        for (row, view, vtable) in placed {
            slots[row * width + view.index()] = Some(vtable);
        }

        debug!(views = width, types = rows.len(), "capability table built");
        Box::leak(Box::new(CapabilityTable {
            views: self.views,
            rows,
            slots,
        }))
    }
}

/// A shared value seen through one interface view.
#[derive(Clone, Default)]
pub struct TraitObj {
    ptr: RawPtr,
    table: Option<&'static CapabilityTable>,
    offset: u32,
}

impl TraitObj {
    /// Box `value` as the pairing named by `offset`.
    #[track_caller]
    pub fn new<T: 'static>(table: &'static CapabilityTable, offset: TypeOffset, value: T) -> Self {
        let row = table.row(offset);
        if row.concrete != TypeId::of::<T>() {
            fatal(RuntimeError::IncompatibleType {
                expected: row.name,
                found: type_name::<T>(),
            });
        }
        let base = NonNull::from(Box::leak(Box::new(value))).cast::<u8>();
        Self {
            // SAFETY: `base` came from a Box<T> and the row's dealloc frees a Box<T>.
            ptr: unsafe { RawPtr::make_owned(base, row.dealloc) },
            table: Some(table),
            offset: offset.0,
        }
    }

    pub const fn empty() -> Self {
        Self {
            ptr: RawPtr::empty(),
            table: None,
            offset: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_none()
    }

    #[inline]
    #[track_caller]
    fn table(&self) -> &'static CapabilityTable {
        match self.table {
            Some(table) => table,
            None => invalid_memory("trait object"),
        }
    }

    #[track_caller]
    pub fn type_offset(&self) -> TypeOffset {
        self.table();
        TypeOffset(self.offset)
    }

    #[track_caller]
    pub fn view(&self) -> ViewId {
        self.table().view_of(TypeOffset(self.offset))
    }

    /// Name of the boxed concrete type.
    #[track_caller]
    pub fn concrete_name(&self) -> &'static str {
        self.table().concrete_name(TypeOffset(self.offset))
    }

    /// The vtable for the current view, checked against `V`.
    #[track_caller]
    pub fn vtable<V: 'static>(&self) -> &'static V {
        let table = self.table();
        let slot = table.slots[self.offset as usize];
        match slot.and_then(|v| v.downcast_ref::<V>()) {
            Some(v) => v,
            None => fatal(RuntimeError::IncompatibleType {
                expected: type_name::<V>(),
                found: table.view_name(self.view()),
            }),
        }
    }

    /// Address of the boxed value, for vtable entries.
    #[track_caller]
    pub fn data(&self) -> NonNull<u8> {
        self.ptr.expect_payload("trait object")
    }

    /// Dispatch through the current view.
    #[track_caller]
    pub fn call<V: 'static, R>(&self, f: impl FnOnce(&'static V, NonNull<u8>) -> R) -> R {
        f(self.vtable::<V>(), self.data())
    }

    /// Re-project onto `view`. Shares the payload.
    #[track_caller]
    pub fn mask(&self, view: ViewId) -> TraitObj {
        let table = self.table();
        match table.remap(TypeOffset(self.offset), view) {
            Some(offset) => TraitObj {
                ptr: self.ptr.clone(),
                table: self.table,
                offset: offset.0,
            },
            None => fatal(RuntimeError::IncompatibleType {
                expected: table.view_name(view),
                found: self.concrete_name(),
            }),
        }
    }

    /// `mask` that reports a missing view instead of raising.
    pub fn try_mask(&self, view: ViewId) -> Option<TraitObj> {
        let table = self.table?;
        let offset = table.remap(TypeOffset(self.offset), view)?;
        Some(TraitObj {
            ptr: self.ptr.clone(),
            table: self.table,
            offset: offset.0,
        })
    }

    /// Checked downcast to the concrete type.
    #[track_caller]
    pub fn cast<T: Clone + 'static>(&self) -> T {
        self.cast_ptr::<T>().get().clone()
    }

    /// Checked downcast to a pointer sharing the payload.
    #[track_caller]
    pub fn cast_ptr<T: 'static>(&self) -> Ptr<T> {
        let row = self.table().row(TypeOffset(self.offset));
        if row.concrete != TypeId::of::<T>() {
            fatal(RuntimeError::IncompatibleType {
                expected: type_name::<T>(),
                found: row.name,
            });
        }
        // SAFETY: the row's type is `T`, and the clone carries our count.
        unsafe { Ptr::from_raw(self.ptr.clone()) }
    }

    pub fn ptr_eq(&self, other: &TraitObj) -> bool {
        self.ptr.ptr_eq(&other.ptr)
    }

    pub fn strong_count(&self) -> usize {
        self.ptr.strong_count()
    }
}

impl fmt::Debug for TraitObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table {
            Some(table) => f
                .debug_struct("TraitObj")
                .field("type", &table.concrete_name(TypeOffset(self.offset)))
                .field("view", &table.view_name(table.view_of(TypeOffset(self.offset))))
                .finish(),
            None => f.write_str("TraitObj(<nil>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    #[derive(Clone, Debug, PartialEq)]
    struct Circle {
        r: f64,
    }

    #[derive(Clone)]
    struct Label(String);

    struct Shape {
        area: unsafe fn(NonNull<u8>) -> f64,
    }

    struct Named {
        name: unsafe fn(NonNull<u8>) -> String,
    }

    unsafe fn circle_area(p: NonNull<u8>) -> f64 {
        let c = p.cast::<Circle>().as_ref();
        3.0 * c.r * c.r
    }

    unsafe fn circle_name(_: NonNull<u8>) -> String {
        "circle".to_string()
    }

    unsafe fn label_name(p: NonNull<u8>) -> String {
        p.cast::<Label>().as_ref().0.clone()
    }

    static CIRCLE_SHAPE: Shape = Shape { area: circle_area };
    static CIRCLE_NAMED: Named = Named { name: circle_name };
    static LABEL_NAMED: Named = Named { name: label_name };

    struct Fixture {
        table: &'static CapabilityTable,
        shape: ViewId,
        named: ViewId,
    }

    fn fixture() -> &'static Fixture {
        static FIXTURE: OnceLock<Fixture> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let mut b = CapabilityTable::builder();
            let shape = b.view("Shape");
            let named = b.view("Named");
            b.implement::<Circle, _>(shape, &CIRCLE_SHAPE)
                .implement::<Circle, _>(named, &CIRCLE_NAMED)
                .implement::<Label, _>(named, &LABEL_NAMED);
            Fixture {
                table: b.build(),
                shape,
                named,
            }
        })
    }

    #[test]
    fn dispatch_through_offset() {
        let fx = fixture();
        let offset = fx.table.offset_of::<Circle>(fx.shape).unwrap();
        let obj = TraitObj::new(fx.table, offset, Circle { r: 2.0 });
        let area = obj.call(|v: &Shape, data| unsafe { (v.area)(data) });
        assert_eq!(area, 12.0);
        assert_eq!(obj.view(), fx.shape);
    }

    #[test]
    #[cfg(not(feature = "no-refcount"))]
    fn mask_shares_the_payload() {
        let fx = fixture();
        let offset = fx.table.offset_of::<Circle>(fx.shape).unwrap();
        let obj = TraitObj::new(fx.table, offset, Circle { r: 1.0 });
        let named = obj.mask(fx.named);
        assert!(named.ptr_eq(&obj));
        assert_eq!(obj.strong_count(), 2);
        assert_eq!(named.call(|v: &Named, d| unsafe { (v.name)(d) }), "circle");
        assert_eq!(named.mask(fx.shape).type_offset(), offset);
    }

    #[test]
    fn missing_view_is_reported() {
        let fx = fixture();
        assert!(fx.table.offset_of::<Label>(fx.shape).is_none());
        let offset = fx.table.offset_of::<Label>(fx.named).unwrap();
        let obj = TraitObj::new(fx.table, offset, Label("tag".into()));
        assert!(obj.try_mask(fx.shape).is_none());
        assert_eq!(obj.call(|v: &Named, d| unsafe { (v.name)(d) }), "tag");
    }

    #[test]
    #[should_panic(expected = "incompatible type")]
    fn mask_to_unimplemented_view_is_fatal() {
        let fx = fixture();
        let offset = fx.table.offset_of::<Label>(fx.named).unwrap();
        let _ = TraitObj::new(fx.table, offset, Label("x".into())).mask(fx.shape);
    }

    #[test]
    fn views_of_another_table_do_not_remap() {
        let fx = fixture();
        let mut other = CapabilityTable::builder();
        for name in ["a", "b", "c"] {
            other.view(name);
        }
        let foreign = other.view("d");
        let offset = fx.table.offset_of::<Circle>(fx.shape).unwrap();
        assert_eq!(fx.table.remap(offset, foreign), None);
        assert_eq!(fx.table.offset_of::<Circle>(foreign), None);
        assert_eq!(fx.table.view_name(foreign), "<unknown view>");

        let obj = TraitObj::new(fx.table, offset, Circle { r: 1.0 });
        assert!(obj.try_mask(foreign).is_none());
    }

    #[test]
    #[should_panic(expected = "incompatible type: expected `<unknown view>`")]
    fn mask_to_a_foreign_view_is_fatal() {
        let fx = fixture();
        let mut other = CapabilityTable::builder();
        for name in ["a", "b", "c"] {
            other.view(name);
        }
        let foreign = other.view("d");
        let offset = fx.table.offset_of::<Circle>(fx.shape).unwrap();
        let obj = TraitObj::new(fx.table, offset, Circle { r: 1.0 });
        let _ = obj.mask(foreign).cast_ptr::<Label>();
    }

    #[test]
    fn cast_back_to_concrete() {
        let fx = fixture();
        let offset = fx.table.offset_of::<Circle>(fx.named).unwrap();
        let obj = TraitObj::new(fx.table, offset, Circle { r: 5.0 });
        assert_eq!(obj.cast::<Circle>(), Circle { r: 5.0 });
        assert_eq!(obj.concrete_name(), type_name::<Circle>());
    }

    #[test]
    #[should_panic(expected = "incompatible type")]
    fn constructing_with_wrong_type_is_fatal() {
        let fx = fixture();
        let offset = fx.table.offset_of::<Circle>(fx.shape).unwrap();
        let _ = TraitObj::new(fx.table, offset, Label("no".into()));
    }

    #[test]
    #[cfg(not(feature = "unchecked"))]
    #[should_panic(expected = "invalid memory access")]
    fn empty_dispatch_is_fatal() {
        let _ = TraitObj::empty().vtable::<Shape>();
    }
}
