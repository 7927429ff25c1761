//! Small-object-optimization allocator.
//!
//! [`SooAllocator`] owns an inline buffer of type `Space` and serves at most
//! one allocation from it at a time. Everything else, and anything that does
//! not fit, goes to the fallback allocator. Used as the allocator of an
//! [`AnyBox`](crate::AnyBox), it keeps small payloads out of the heap.

use core::alloc::Layout;
use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};

use log::trace;

use crate::allocator::{AllocError, Allocator, DirectAllocator, Global, Handle, RawAllocator};

/// Allocator with an inline buffer of type `Space` and a fallback `A`.
///
/// Inline allocations are handed out as offsets, so the allocator (and a box
/// that owns it) can be moved while the allocation is live.
///
/// The fallback must be a [`DirectAllocator`], so `SooAllocator`s do not nest:
///
/// ```compile_fail
/// use anybox::soo::SooAllocator;
/// use anybox::space::S1;
///
/// let nested = SooAllocator::<S1, SooAllocator<S1>>::with_fallback(SooAllocator::new());
/// ```
///
/// Nor through a reference:
///
/// ```compile_fail
/// use anybox::soo::SooAllocator;
/// use anybox::space::S1;
///
/// let inner = SooAllocator::<S1>::new();
/// let nested = SooAllocator::<S1, &SooAllocator<S1>>::with_fallback(&inner);
/// ```
///
/// # Example
///
/// ```
/// use anybox::allocator::{allocate, deallocate};
/// use anybox::soo::SooAllocator;
/// use anybox::space::S2;
/// use core::alloc::Layout;
///
/// let soo = SooAllocator::<S2>::new();
///
/// let first = allocate(&soo, Layout::new::<u64>()).unwrap();
/// assert!(first.is_inline());
///
/// // the slot is taken, so the next request goes to the heap
/// let second = allocate(&soo, Layout::new::<u64>()).unwrap();
/// assert!(!second.is_inline());
///
/// unsafe {
///     deallocate(&soo, second);
///     deallocate(&soo, first);
/// }
/// assert!(!soo.is_inline_used());
/// ```
pub struct SooAllocator<Space, A: DirectAllocator = Global> {
    space: UnsafeCell<MaybeUninit<Space>>,
    used: Cell<bool>,
    fallback: A,
}

impl<Space> SooAllocator<Space> {
    /// An allocator falling back to the global heap.
    pub const fn new() -> SooAllocator<Space> {
        SooAllocator::with_fallback(Global)
    }
}

impl<Space, A: DirectAllocator> SooAllocator<Space, A> {
    /// An allocator falling back to `fallback`.
    pub const fn with_fallback(fallback: A) -> SooAllocator<Space, A> {
        SooAllocator {
            space: UnsafeCell::new(MaybeUninit::uninit()),
            used: Cell::new(false),
            fallback,
        }
    }

    /// The fallback allocator.
    pub fn fallback(&self) -> &A {
        &self.fallback
    }

    /// Inline capacity in bytes.
    pub const fn capacity() -> usize {
        mem::size_of::<Space>()
    }

    /// Returns true if the inline slot is reserved.
    pub fn is_inline_used(&self) -> bool {
        self.used.get()
    }

    fn fits_inline(layout: Layout) -> bool {
        layout.size() <= mem::size_of::<Space>() && layout.align() <= mem::align_of::<Space>()
    }
}

unsafe impl<Space, A: DirectAllocator> RawAllocator for SooAllocator<Space, A> {
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError> {
        if Self::fits_inline(layout) && !self.used.get() {
            self.used.set(true);
            return Ok(Handle::inline(0, layout));
        }

        trace!(
            "inline slot unavailable for {} bytes (align {}), using fallback",
            layout.size(),
            layout.align()
        );
        let handle = self.fallback.allocate(layout)?;
        debug_assert!(!handle.is_inline(), "fallback allocator returned an inline handle");
        Ok(handle)
    }

    unsafe fn deallocate(&self, handle: Handle) {
        if handle.is_inline() {
            debug_assert!(self.used.get(), "inline slot released twice");
            self.used.set(false);
        } else {
            self.fallback.deallocate(handle)
        }
    }

    unsafe fn resolve(&self, handle: &Handle) -> NonNull<u8> {
        match handle.inline_offset() {
            Some(offset) => NonNull::new_unchecked(self.space.get().cast::<u8>().add(offset)),
            None => self.fallback.resolve(handle),
        }
    }
}

unsafe impl<Space, A: DirectAllocator> Allocator for SooAllocator<Space, A> {
    fn is_equal(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl<Space, A: DirectAllocator + Default> Default for SooAllocator<Space, A> {
    fn default() -> Self {
        SooAllocator::with_fallback(A::default())
    }
}

impl<Space, A: DirectAllocator + fmt::Debug> fmt::Debug for SooAllocator<Space, A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SooAllocator")
            .field("capacity", &Self::capacity())
            .field("used", &self.used.get())
            .field("fallback", &self.fallback)
            .finish()
    }
}
