//! Space types that set the inline capacity of a [`SooAllocator`](crate::soo::SooAllocator).
//!
//! The size of the space type is the inline capacity and its alignment is the
//! largest alignment the inline buffer can serve. Any sized type works as a
//! space, these aliases just cover the common cases.

/// Represents a buffer of `1 * size_of::<usize>()` bytes.
pub type S1 = [usize; 1];
/// Represents a buffer of `2 * size_of::<usize>()` bytes.
pub type S2 = [usize; 2];
/// Represents a buffer of `4 * size_of::<usize>()` bytes.
pub type S4 = [usize; 4];
/// Represents a buffer of `8 * size_of::<usize>()` bytes.
pub type S8 = [usize; 8];
/// Represents a buffer of `16 * size_of::<usize>()` bytes.
pub type S16 = [usize; 16];
/// Represents a buffer of `32 * size_of::<usize>()` bytes.
pub type S32 = [usize; 32];
/// Represents a buffer of `64 * size_of::<usize>()` bytes.
pub type S64 = [usize; 64];
