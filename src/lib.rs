//! # AnyBox: Type-Erased, Allocator-Aware Boxes
//!
//! [`AnyBox`] holds one value of a type chosen at run time, in storage obtained
//! from an allocator of your choice. After construction the box forgets the
//! concrete type and drives every lifetime operation (move, copy, swap, drop)
//! through a [`DispatchTable`](dispatch::DispatchTable) built once per type.
//!
//! ## Core Concept
//!
//! A box declares up front which operations its payloads must support, through
//! a requirement type:
//!
//! - [`Trivial`]: payloads are `Copy`, every operation is a plain bit copy.
//! - [`Normal`]: payloads are `Clone`, boxes can be cloned.
//! - [`Unique`]: any `'static` payload, boxes are move-only.
//!
//! Emplacing a type that cannot meet the requirement is a compile error, and so
//! is using a box where a stronger requirement is expected.
//!
//! ## Quick Start
//!
//! ```rust
//! use anybox::NormalBox;
//!
//! let mut b: NormalBox = NormalBox::new();
//! assert!(!b.has_value());
//!
//! b.emplace(42i32);
//! assert!(b.is_type::<i32>());
//! assert_eq!(b.downcast_ref::<i32>(), Some(&42));
//!
//! // the old payload is dropped before the new one is built
//! b.emplace(String::from("hi"));
//! assert!(!b.is_type::<i32>());
//! assert_eq!(b.downcast_ref::<String>().unwrap(), "hi");
//!
//! let copy = b.clone();
//! b.reset();
//! assert!(!b.has_value());
//! assert_eq!(copy.downcast_ref::<String>().unwrap(), "hi");
//! ```
//!
//! ## Small Payloads Without the Heap
//!
//! Pair a box with a [`SooAllocator`] to keep payloads that fit its inline
//! space out of the heap. Capacities come from [`space`], or any type you
//! choose:
//!
//! ```rust
//! use anybox::UniqueSooBox;
//! use anybox::space::S4;
//!
//! let mut b: UniqueSooBox<S4> = UniqueSooBox::new();
//!
//! b.emplace([1u64, 2, 3]);
//! assert!(b.allocator().is_inline_used());
//!
//! b.emplace([0u64; 16]);
//! assert!(!b.allocator().is_inline_used());
//! ```
//!
//! **Important**: the alignment of the space matters. A payload aligned more
//! strictly than the space goes to the fallback allocator regardless of size.
//!
//! ## Requirements Are Checked at Compile Time
//!
//! A move-only payload does not fit in a box that can be cloned:
//!
//! ```compile_fail
//! use anybox::NormalBox;
//!
//! struct Token;
//!
//! let mut b: NormalBox = NormalBox::new();
//! b.emplace(Token);
//! ```
//!
//! A unique box cannot be cloned:
//!
//! ```compile_fail
//! use anybox::UniqueBox;
//!
//! let b: UniqueBox = UniqueBox::from_value(1u8);
//! let _ = b.clone();
//! ```
//!
//! Nor copied or moved into a normal box:
//!
//! ```compile_fail
//! use anybox::{NormalBox, UniqueBox};
//!
//! let mut src: UniqueBox = UniqueBox::from_value(1u8);
//! let mut dst: NormalBox = NormalBox::new();
//! dst.move_from(&mut src);
//! ```
//!
//! The other direction is fine:
//!
//! ```rust
//! use anybox::{TrivialBox, UniqueBox};
//!
//! let mut src: TrivialBox = TrivialBox::from_value(7u32);
//! let mut dst: UniqueBox = UniqueBox::new();
//! dst.move_from(&mut src);
//! assert!(!src.has_value());
//! assert_eq!(dst.downcast::<u32>().ok(), Some(7));
//! ```
//!
//! ## Custom Allocators
//!
//! Implement [`RawAllocator`](allocator::RawAllocator) and
//! [`Allocator`](allocator::Allocator). The allocator decides how boxes move
//! between each other: always-equal and propagating allocators let moves hand
//! the storage over, while distinct instances of other allocators relocate the
//! payload through its dispatch table.
//!
//! ## Configuration
//!
//! ### Feature Flags
//!
//! - **`std`** (enabled by default)
//!   - Implements `std::error::Error` for [`AllocError`]
//!   - Disable for `#![no_std]` environments: `default-features = false`
//!
//! - **`nightly`** (optional, requires nightly)
//!   - Uses the strict provenance APIs of `core`
//!
//! ### Logging
//!
//! The crate logs through the [`log`] facade at `trace` level when a payload
//! leaves the inline space of a [`SooAllocator`], is relocated between
//! allocators, or needs new storage during an assignment.

#![cfg_attr(feature = "nightly", feature(strict_provenance))]
#![cfg_attr(not(feature = "std"), no_std)]
#![allow(stable_features)]
#![deny(missing_docs)]
#![deny(clippy::as_conversions)]

extern crate alloc;

pub mod allocator;
mod anybox;
pub mod dispatch;
pub mod req;
pub mod soo;
pub mod space;
mod sptr;

pub use crate::allocator::{AllocError, Allocator, DirectAllocator, Global};
pub use crate::anybox::AnyBox;
pub use crate::req::{LifetimeReq, Normal, Trivial, Unique};
pub use crate::soo::SooAllocator;

/// A box for `Copy` payloads.
pub type TrivialBox<A = Global> = AnyBox<Trivial, A>;

/// A box for `Clone` payloads.
pub type NormalBox<A = Global> = AnyBox<Normal, A>;

/// A move-only box for any `'static` payload.
pub type UniqueBox<A = Global> = AnyBox<Unique, A>;

/// A [`TrivialBox`] keeping payloads up to the size of `Space` inline.
pub type TrivialSooBox<Space, A = Global> = AnyBox<Trivial, SooAllocator<Space, A>>;

/// A [`NormalBox`] keeping payloads up to the size of `Space` inline.
pub type NormalSooBox<Space, A = Global> = AnyBox<Normal, SooAllocator<Space, A>>;

/// A [`UniqueBox`] keeping payloads up to the size of `Space` inline.
pub type UniqueSooBox<Space, A = Global> = AnyBox<Unique, SooAllocator<Space, A>>;
