//! Allocator interface, allocation handles and the helpers the dispatch
//! tables build on.
//!
//! A [`Handle`] is the only thing an erased operation touches: a byte range
//! with a layout and no type. Handles are created by [`allocate`], released by
//! [`deallocate`] (which consumes them) and turned into addresses by
//! [`address`]. [`construct`] and [`destroy`] place and drop typed values
//! inside a handle.

use core::alloc::Layout;
use core::fmt;
use core::mem;
use core::ptr::{self, NonNull};

#[cfg(not(feature = "std"))]
use alloc::alloc;
#[cfg(feature = "std")]
use std::alloc;

use crate::sptr;

/// The allocator could not serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    /// Creates an error for a failed request of `layout`.
    pub const fn new(layout: Layout) -> AllocError {
        AllocError { layout }
    }

    /// The layout that could not be allocated.
    pub const fn layout(&self) -> Layout {
        self.layout
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "memory allocation of {} bytes (align {}) failed",
            self.layout.size(),
            self.layout.align()
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addr {
    Empty,
    Direct(NonNull<u8>),
    Inline(usize),
}

/// An allocated byte range: an address and the layout it was requested with.
///
/// Direct handles carry an absolute pointer. Inline handles carry an offset
/// into storage owned by the allocator itself and only become an address
/// through [`RawAllocator::resolve`], which keeps them valid when the
/// allocator is moved.
///
/// Handles are deliberately not `Clone`: [`deallocate`] consumes them.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    addr: Addr,
    layout: Layout,
}

impl Handle {
    /// A handle that owns no memory.
    pub const fn empty() -> Handle {
        Handle {
            addr: Addr::Empty,
            layout: Layout::new::<()>(),
        }
    }

    /// A handle for memory at an absolute address.
    pub const fn direct(ptr: NonNull<u8>, layout: Layout) -> Handle {
        Handle {
            addr: Addr::Direct(ptr),
            layout,
        }
    }

    /// A handle for memory at `offset` inside the allocator's own storage.
    pub const fn inline(offset: usize, layout: Layout) -> Handle {
        Handle {
            addr: Addr::Inline(offset),
            layout,
        }
    }

    /// Returns true if the handle owns no memory.
    pub const fn is_empty(&self) -> bool {
        matches!(self.addr, Addr::Empty)
    }

    /// Returns true if the handle lives inside the allocator's own storage.
    pub const fn is_inline(&self) -> bool {
        matches!(self.addr, Addr::Inline(_))
    }

    /// The absolute address of a direct handle.
    pub const fn as_direct(&self) -> Option<NonNull<u8>> {
        match self.addr {
            Addr::Direct(ptr) => Some(ptr),
            _ => None,
        }
    }

    /// The offset of an inline handle.
    pub const fn inline_offset(&self) -> Option<usize> {
        match self.addr {
            Addr::Inline(offset) => Some(offset),
            _ => None,
        }
    }

    /// Number of usable bytes.
    pub const fn capacity(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.layout.size()
        }
    }

    /// The layout the memory was requested with.
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns true if a value of `layout` can be placed in this handle.
    pub const fn fits(&self, layout: Layout) -> bool {
        !self.is_empty()
            && self.layout.size() >= layout.size()
            && self.layout.align() >= layout.align()
    }
}

impl Default for Handle {
    fn default() -> Handle {
        Handle::empty()
    }
}

/// The object-safe part of an allocator.
///
/// Dispatch tables receive allocators as `&dyn RawAllocator`, so one table per
/// payload type serves every allocator type.
///
/// # Safety
///
/// `allocate` must return handles with room for `layout` at an address
/// aligned to `layout.align()`, and the memory must stay valid until the
/// handle is passed back to `deallocate` of an equal allocator.
/// `resolve` must return the same address for a handle for as long as the
/// handle is live, or, for inline handles, for as long as the allocator is
/// not moved.
pub unsafe trait RawAllocator {
    /// Requests memory for `layout`. `layout` is never zero-sized when called
    /// through [`allocate`].
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError>;

    /// Releases memory.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by `allocate` of this allocator or an
    /// equal one.
    unsafe fn deallocate(&self, handle: Handle);

    /// Returns the address of a live handle.
    ///
    /// Allocators that never hand out inline handles can rely on the default.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by `allocate` of this allocator or an
    /// equal one and not yet deallocated.
    unsafe fn resolve(&self, handle: &Handle) -> NonNull<u8> {
        debug_assert!(
            !handle.is_inline(),
            "inline handle passed to an allocator without inline storage"
        );
        match handle.as_direct() {
            Some(ptr) => ptr,
            None => sptr::dangling(handle.layout()),
        }
    }
}

/// An allocator a box can own.
///
/// # Safety
///
/// When `is_equal` returns true, or `ALWAYS_EQUAL` is set, memory allocated by
/// one instance must be resolvable and deallocatable by the other.
pub unsafe trait Allocator: RawAllocator {
    /// Any two instances are interchangeable.
    const ALWAYS_EQUAL: bool = false;

    /// Move assignment between boxes carries the allocator along with the
    /// payload.
    const PROPAGATE_ON_MOVE: bool = false;

    /// Returns true if memory of one instance can be released by the other.
    fn is_equal(&self, other: &Self) -> bool {
        let _ = other;
        Self::ALWAYS_EQUAL
    }
}

/// An allocator that only hands out direct handles.
///
/// The fallback of a [`SooAllocator`](crate::SooAllocator) must be one: its
/// inline handles would be taken for the outer allocator's own slot.
///
/// # Safety
///
/// `allocate` must never return an inline handle.
pub unsafe trait DirectAllocator: Allocator {}

/// The global heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Global;

unsafe impl RawAllocator for Global {
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError> {
        if layout.size() == 0 {
            return Ok(Handle::direct(sptr::dangling(layout), layout));
        }
        let ptr = unsafe { alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Handle::direct(ptr, layout)),
            None => Err(AllocError::new(layout)),
        }
    }

    unsafe fn deallocate(&self, handle: Handle) {
        if let Some(ptr) = handle.as_direct() {
            if handle.layout().size() != 0 {
                alloc::dealloc(ptr.as_ptr(), handle.layout());
            }
        }
    }
}

unsafe impl Allocator for Global {
    const ALWAYS_EQUAL: bool = true;
    const PROPAGATE_ON_MOVE: bool = true;
}

unsafe impl DirectAllocator for Global {}

unsafe impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, handle: Handle) {
        (**self).deallocate(handle)
    }

    unsafe fn resolve(&self, handle: &Handle) -> NonNull<u8> {
        (**self).resolve(handle)
    }
}

unsafe impl<A: Allocator> Allocator for &A {
    const ALWAYS_EQUAL: bool = A::ALWAYS_EQUAL;
    const PROPAGATE_ON_MOVE: bool = true;

    fn is_equal(&self, other: &Self) -> bool {
        ptr::eq(*self, *other) || (**self).is_equal(*other)
    }
}

unsafe impl<A: DirectAllocator> DirectAllocator for &A {}

/// Allocates `layout` from `alloc`.
///
/// Zero-sized layouts never reach the allocator.
pub fn allocate<A: RawAllocator + ?Sized>(alloc: &A, layout: Layout) -> Result<Handle, AllocError> {
    if layout.size() == 0 {
        return Ok(Handle::direct(sptr::dangling(layout), layout));
    }
    alloc.allocate(layout)
}

/// Releases `handle`. Empty and zero-sized handles are ignored.
///
/// # Safety
///
/// `handle` must come from [`allocate`] with `alloc` or an equal allocator,
/// and must not hold a live value that still needs dropping.
pub unsafe fn deallocate<A: RawAllocator + ?Sized>(alloc: &A, handle: Handle) {
    if handle.is_empty() || handle.layout().size() == 0 {
        return;
    }
    alloc.deallocate(handle)
}

/// Returns the address of `handle`.
///
/// # Safety
///
/// `handle` must be empty or come from [`allocate`] with `alloc` or an equal
/// allocator.
pub unsafe fn address<A: RawAllocator + ?Sized>(alloc: &A, handle: &Handle) -> NonNull<u8> {
    match handle.addr {
        Addr::Direct(ptr) => ptr,
        Addr::Inline(_) => alloc.resolve(handle),
        Addr::Empty => sptr::dangling(handle.layout()),
    }
}

/// Moves `value` into the memory of `handle` and returns a reference to it.
///
/// # Safety
///
/// `handle` must be live for `alloc`, fit `Layout::new::<T>()` and not hold a
/// value.
pub unsafe fn construct<'a, T, A: RawAllocator + ?Sized>(
    alloc: &'a A,
    handle: &'a Handle,
    value: T,
) -> &'a mut T {
    debug_assert!(
        handle.fits(Layout::new::<T>()) || Layout::new::<T>().size() == 0,
        "handle cannot hold the value"
    );
    let ptr = address(alloc, handle).cast::<T>().as_ptr();
    ptr.write(value);
    &mut *ptr
}

/// Drops the `T` stored in `handle` without releasing the memory.
///
/// # Safety
///
/// `handle` must be live for `alloc` and hold an initialized `T`.
pub unsafe fn destroy<T, A: RawAllocator + ?Sized>(alloc: &A, handle: &Handle) {
    ptr::drop_in_place(address(alloc, handle).cast::<T>().as_ptr());
}

/// Deallocates its handle when dropped, unless released with
/// [`into_handle`](AllocGuard::into_handle).
///
/// Covers the window between allocating storage and handing it to its owner,
/// including unwinding out of a panicking `clone`.
pub struct AllocGuard<'a, A: RawAllocator + ?Sized> {
    alloc: &'a A,
    handle: Handle,
}

impl<'a, A: RawAllocator + ?Sized> AllocGuard<'a, A> {
    /// Guards `handle`, which must come from `alloc`.
    pub fn new(alloc: &'a A, handle: Handle) -> AllocGuard<'a, A> {
        AllocGuard { alloc, handle }
    }

    /// The guarded handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Disarms the guard and returns the handle.
    pub fn into_handle(mut self) -> Handle {
        mem::take(&mut self.handle)
    }
}

impl<A: RawAllocator + ?Sized> Drop for AllocGuard<'_, A> {
    fn drop(&mut self) {
        let handle = mem::take(&mut self.handle);
        unsafe { deallocate(self.alloc, handle) }
    }
}
