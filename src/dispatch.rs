//! Type-erased dispatch tables.
//!
//! A [`DispatchTable`] is a hand-rolled vtable: function pointers built from a
//! concrete type and erased to operate on [`Handle`]s and `&dyn RawAllocator`
//! only, plus the payload layout and a type tag. Tables are `const` values,
//! one per payload type and requirement, obtained through [`Admits`].

use core::alloc::Layout;
use core::any::{self, TypeId};
use core::fmt;
use core::ptr;

use crate::allocator::{self, AllocError, AllocGuard, Handle, RawAllocator};
use crate::req::{LifetimeReq, Normal, Requirement, Trivial, Unique};

type ConstructFn =
    unsafe fn(&dyn RawAllocator, &dyn RawAllocator, &Handle) -> Result<Handle, AllocError>;
type AssignFn = unsafe fn(
    &dyn RawAllocator,
    &mut Handle,
    bool,
    &dyn RawAllocator,
    &Handle,
) -> Result<(), AllocError>;
type DestroyFn = unsafe fn(&dyn RawAllocator, &Handle, bool);
type SwapFn = unsafe fn(&dyn RawAllocator, &Handle, &dyn RawAllocator, &Handle);

/// Erased lifetime operations of one payload type.
///
/// Entries for copy operations are absent when the table was built for a
/// requirement that does not include them.
#[derive(Clone, Copy)]
pub struct DispatchTable {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    layout: Layout,
    req: LifetimeReq,
    move_construct: ConstructFn,
    copy_construct: Option<ConstructFn>,
    move_assign: AssignFn,
    copy_assign: Option<AssignFn>,
    destroy: DestroyFn,
    swap: SwapFn,
}

impl DispatchTable {
    /// Table for a move-only payload.
    pub const fn unique<T: 'static>() -> DispatchTable {
        DispatchTable {
            type_id: TypeId::of::<T>,
            type_name: any::type_name::<T>,
            layout: Layout::new::<T>(),
            req: LifetimeReq::UNIQUE,
            move_construct: move_construct::<T>,
            copy_construct: None,
            move_assign: move_assign::<T>,
            copy_assign: None,
            destroy: destroy::<T>,
            swap: swap::<T>,
        }
    }

    /// Table for a payload copied with `Clone`.
    pub const fn normal<T: Clone + 'static>() -> DispatchTable {
        DispatchTable {
            req: LifetimeReq::NORMAL,
            copy_construct: Some(copy_construct::<T>),
            copy_assign: Some(copy_assign::<T>),
            ..DispatchTable::unique::<T>()
        }
    }

    /// Table for a payload copied bitwise.
    pub const fn trivial<T: Copy + 'static>() -> DispatchTable {
        DispatchTable {
            req: LifetimeReq::TRIVIAL,
            copy_construct: Some(copy_construct_trivial::<T>),
            copy_assign: Some(copy_assign_trivial::<T>),
            ..DispatchTable::unique::<T>()
        }
    }

    /// Type tag of the payload.
    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Name of the payload type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }

    /// Layout of the payload.
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Size of the payload in bytes.
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    /// Operations this table provides.
    pub const fn req(&self) -> LifetimeReq {
        self.req
    }

    /// Returns true if the payload type is `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    /// Returns true if both tables describe the same payload type.
    pub fn same_type(&self, other: &DispatchTable) -> bool {
        ptr::eq(self, other) || self.type_id() == other.type_id()
    }

    /// Returns true if the copy entries are present.
    pub const fn can_copy(&self) -> bool {
        self.copy_construct.is_some() && self.copy_assign.is_some()
    }

    /// Moves the payload of `src` into fresh storage from `dst_alloc`.
    ///
    /// On success the source is left moved-from: its memory must be released
    /// without dropping. On failure the source is untouched.
    ///
    /// # Safety
    ///
    /// `src` must be live for `src_alloc` and hold this table's payload type.
    pub unsafe fn move_construct(
        &self,
        dst_alloc: &dyn RawAllocator,
        src_alloc: &dyn RawAllocator,
        src: &Handle,
    ) -> Result<Handle, AllocError> {
        (self.move_construct)(dst_alloc, src_alloc, src)
    }

    /// Copies the payload of `src` into fresh storage from `dst_alloc`.
    ///
    /// Returns `None` if this table has no copy entries.
    ///
    /// # Safety
    ///
    /// As for [`move_construct`](DispatchTable::move_construct).
    pub unsafe fn copy_construct(
        &self,
        dst_alloc: &dyn RawAllocator,
        src_alloc: &dyn RawAllocator,
        src: &Handle,
    ) -> Option<Result<Handle, AllocError>> {
        let entry = self.copy_construct?;
        Some(entry(dst_alloc, src_alloc, src))
    }

    /// Moves the payload of `src` over the destination.
    ///
    /// If `dst_has_value`, the destination payload is replaced. Otherwise the
    /// payload is moved into `dst`'s storage, allocating when `dst` is empty.
    /// On success the source is left moved-from.
    ///
    /// # Safety
    ///
    /// `src` must hold this table's payload type. If `dst_has_value`, so must
    /// `dst`; otherwise `dst` must be empty or fit [`layout`](DispatchTable::layout)
    /// without holding a value.
    pub unsafe fn move_assign(
        &self,
        dst_alloc: &dyn RawAllocator,
        dst: &mut Handle,
        dst_has_value: bool,
        src_alloc: &dyn RawAllocator,
        src: &Handle,
    ) -> Result<(), AllocError> {
        (self.move_assign)(dst_alloc, dst, dst_has_value, src_alloc, src)
    }

    /// Copies the payload of `src` over the destination.
    ///
    /// Returns `None` if this table has no copy entries.
    ///
    /// # Safety
    ///
    /// As for [`move_assign`](DispatchTable::move_assign).
    pub unsafe fn copy_assign(
        &self,
        dst_alloc: &dyn RawAllocator,
        dst: &mut Handle,
        dst_has_value: bool,
        src_alloc: &dyn RawAllocator,
        src: &Handle,
    ) -> Option<Result<(), AllocError>> {
        let entry = self.copy_assign?;
        Some(entry(dst_alloc, dst, dst_has_value, src_alloc, src))
    }

    /// Drops the payload in `handle` if `has_value`. The memory is kept.
    ///
    /// # Safety
    ///
    /// If `has_value`, `handle` must hold this table's payload type.
    pub unsafe fn destroy(&self, alloc: &dyn RawAllocator, handle: &Handle, has_value: bool) {
        (self.destroy)(alloc, handle, has_value)
    }

    /// Exchanges two payloads of this table's type in place.
    ///
    /// # Safety
    ///
    /// Both handles must hold this table's payload type.
    pub unsafe fn swap(
        &self,
        a_alloc: &dyn RawAllocator,
        a: &Handle,
        b_alloc: &dyn RawAllocator,
        b: &Handle,
    ) {
        (self.swap)(a_alloc, a, b_alloc, b)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("type", &self.type_name())
            .field("layout", &self.layout)
            .field("req", &self.req)
            .finish()
    }
}

impl PartialEq for DispatchTable {
    fn eq(&self, other: &DispatchTable) -> bool {
        self.same_type(other) && self.req == other.req
    }
}

unsafe fn slot<T>(alloc: &dyn RawAllocator, handle: &Handle) -> *mut T {
    allocator::address(alloc, handle).cast::<T>().as_ptr()
}

/// Makes sure `dst` has storage for a `T`, allocating when it is empty.
unsafe fn reserve<T>(alloc: &dyn RawAllocator, dst: &mut Handle) -> Result<(), AllocError> {
    if dst.is_empty() {
        *dst = allocator::allocate(alloc, Layout::new::<T>())?;
    }
    debug_assert!(dst.fits(Layout::new::<T>()) || Layout::new::<T>().size() == 0);
    Ok(())
}

unsafe fn move_construct<T>(
    dst_alloc: &dyn RawAllocator,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<Handle, AllocError> {
    let handle = allocator::allocate(dst_alloc, Layout::new::<T>())?;
    ptr::copy_nonoverlapping(slot::<T>(src_alloc, src), slot::<T>(dst_alloc, &handle), 1);
    Ok(handle)
}

unsafe fn copy_construct<T: Clone>(
    dst_alloc: &dyn RawAllocator,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<Handle, AllocError> {
    let handle = allocator::allocate(dst_alloc, Layout::new::<T>())?;
    let guard = AllocGuard::new(dst_alloc, handle);
    let value = (*slot::<T>(src_alloc, src)).clone();
    allocator::construct(dst_alloc, guard.handle(), value);
    Ok(guard.into_handle())
}

unsafe fn copy_construct_trivial<T: Copy>(
    dst_alloc: &dyn RawAllocator,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<Handle, AllocError> {
    let handle = allocator::allocate(dst_alloc, Layout::new::<T>())?;
    slot::<T>(dst_alloc, &handle).write(*slot::<T>(src_alloc, src));
    Ok(handle)
}

unsafe fn move_assign<T>(
    dst_alloc: &dyn RawAllocator,
    dst: &mut Handle,
    dst_has_value: bool,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<(), AllocError> {
    if dst_has_value {
        *slot::<T>(dst_alloc, dst) = slot::<T>(src_alloc, src).read();
    } else {
        reserve::<T>(dst_alloc, dst)?;
        slot::<T>(dst_alloc, dst).write(slot::<T>(src_alloc, src).read());
    }
    Ok(())
}

unsafe fn copy_assign<T: Clone>(
    dst_alloc: &dyn RawAllocator,
    dst: &mut Handle,
    dst_has_value: bool,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<(), AllocError> {
    let source = &*slot::<T>(src_alloc, src);
    if dst_has_value {
        (*slot::<T>(dst_alloc, dst)).clone_from(source);
    } else {
        reserve::<T>(dst_alloc, dst)?;
        slot::<T>(dst_alloc, dst).write(source.clone());
    }
    Ok(())
}

unsafe fn copy_assign_trivial<T: Copy>(
    dst_alloc: &dyn RawAllocator,
    dst: &mut Handle,
    dst_has_value: bool,
    src_alloc: &dyn RawAllocator,
    src: &Handle,
) -> Result<(), AllocError> {
    if !dst_has_value {
        reserve::<T>(dst_alloc, dst)?;
    }
    slot::<T>(dst_alloc, dst).write(*slot::<T>(src_alloc, src));
    Ok(())
}

unsafe fn destroy<T>(alloc: &dyn RawAllocator, handle: &Handle, has_value: bool) {
    if has_value {
        allocator::destroy::<T, _>(alloc, handle);
    }
}

unsafe fn swap<T>(a_alloc: &dyn RawAllocator, a: &Handle, b_alloc: &dyn RawAllocator, b: &Handle) {
    ptr::swap(slot::<T>(a_alloc, a), slot::<T>(b_alloc, b));
}

/// A requirement that accepts payloads of type `T`.
///
/// Implemented by [`Unique`] for every `T`, by [`Normal`] for `T: Clone` and
/// by [`Trivial`] for `T: Copy`. A box of requirement `R` can only hold `T`
/// when `R: Admits<T>`, so a payload that cannot meet the requirement never
/// gets a table.
pub trait Admits<T: 'static>: Requirement {
    /// The table for `T` under this requirement.
    const TABLE: DispatchTable;

    /// A `'static` reference to [`TABLE`](Admits::TABLE).
    fn table() -> &'static DispatchTable {
        &Self::TABLE
    }
}

impl<T: 'static> Admits<T> for Unique {
    const TABLE: DispatchTable = DispatchTable::unique::<T>();
}

impl<T: Clone + 'static> Admits<T> for Normal {
    const TABLE: DispatchTable = DispatchTable::normal::<T>();
}

impl<T: Copy + 'static> Admits<T> for Trivial {
    const TABLE: DispatchTable = DispatchTable::trivial::<T>();
}
