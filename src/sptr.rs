use core::alloc::Layout;
use core::ptr::NonNull;

#[cfg(feature = "nightly")]
mod implementation {
    pub use core::ptr::without_provenance_mut;
}

#[cfg(not(feature = "nightly"))]
#[allow(clippy::as_conversions)]
mod implementation {
    pub fn without_provenance_mut<T>(addr: usize) -> *mut T {
        addr as _
    }
}

pub use implementation::*;

/// Non-null pointer aligned for `layout`, standing in for zero-sized allocations.
pub fn dangling(layout: Layout) -> NonNull<u8> {
    // alignment is never zero
    unsafe { NonNull::new_unchecked(without_provenance_mut(layout.align())) }
}
