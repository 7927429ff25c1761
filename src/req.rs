//! Requirement descriptors: which lifetime operations a box supports and
//! whether they may panic.
//!
//! A [`LifetimeReq`] assigns a [`Level`] to each of the seven lifetime
//! operations. Descriptors form a join-semilattice under
//! [`LifetimeReq::at_least`] and are partially ordered: a descriptor is
//! greater than another when it is at least as strong on every operation.
//!
//! Boxes are parameterized by a [`Requirement`] marker ([`Trivial`],
//! [`Normal`], [`Unique`]) instead of a descriptor value, so a payload type
//! that cannot meet the requirement is rejected by the compiler.

use core::cmp::Ordering;

/// Capability level of a single lifetime operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    /// The operation is not supported.
    #[default]
    IllFormed,
    /// The operation is supported and may panic.
    WellFormed,
    /// The operation is supported and never panics.
    NoException,
}

impl Level {
    const fn rank(self) -> u8 {
        match self {
            Level::IllFormed => 0,
            Level::WellFormed => 1,
            Level::NoException => 2,
        }
    }

    /// Returns the stronger of the two levels.
    pub const fn max(self, other: Level) -> Level {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Returns true if the operation exists at all.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Level::IllFormed)
    }

    const fn covers(self, other: Level) -> bool {
        self.rank() >= other.rank()
    }
}

/// Per-operation capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LifetimeReq {
    /// Construction of a value from nothing (`Default`).
    pub default_construct: Level,
    /// Moving a value into fresh storage.
    pub move_construct: Level,
    /// Copying a value into fresh storage.
    pub copy_construct: Level,
    /// Moving a value over an existing one.
    pub move_assign: Level,
    /// Copying a value over an existing one.
    pub copy_assign: Level,
    /// Dropping a value.
    pub destruct: Level,
    /// Exchanging two values of the same type.
    pub swap: Level,
}

impl LifetimeReq {
    /// Nothing is supported.
    pub const ILL_FORMED: LifetimeReq = LifetimeReq {
        default_construct: Level::IllFormed,
        move_construct: Level::IllFormed,
        copy_construct: Level::IllFormed,
        move_assign: Level::IllFormed,
        copy_assign: Level::IllFormed,
        destruct: Level::IllFormed,
        swap: Level::IllFormed,
    };

    /// Move-only payloads.
    pub const UNIQUE: LifetimeReq = LifetimeReq {
        default_construct: Level::IllFormed,
        move_construct: Level::NoException,
        copy_construct: Level::IllFormed,
        move_assign: Level::NoException,
        copy_assign: Level::IllFormed,
        destruct: Level::NoException,
        swap: Level::NoException,
    };

    /// Copyable payloads whose copies may panic.
    pub const NORMAL: LifetimeReq = LifetimeReq {
        copy_construct: Level::WellFormed,
        copy_assign: Level::WellFormed,
        ..LifetimeReq::UNIQUE
    };

    /// Payloads whose copies are bitwise and never panic.
    pub const TRIVIAL: LifetimeReq = LifetimeReq {
        copy_construct: Level::NoException,
        copy_assign: Level::NoException,
        ..LifetimeReq::UNIQUE
    };

    #[doc(hidden)]
    pub const fn probed(copy: Level, default: Level) -> LifetimeReq {
        LifetimeReq {
            default_construct: default,
            copy_construct: copy,
            copy_assign: copy,
            ..LifetimeReq::UNIQUE
        }
    }

    /// Pointwise maximum of two descriptors.
    pub const fn at_least(self, other: LifetimeReq) -> LifetimeReq {
        LifetimeReq {
            default_construct: self.default_construct.max(other.default_construct),
            move_construct: self.move_construct.max(other.move_construct),
            copy_construct: self.copy_construct.max(other.copy_construct),
            move_assign: self.move_assign.max(other.move_assign),
            copy_assign: self.copy_assign.max(other.copy_assign),
            destruct: self.destruct.max(other.destruct),
            swap: self.swap.max(other.swap),
        }
    }

    /// Returns true if `self` is at least as strong as `other` on every operation.
    pub const fn dominates(&self, other: &LifetimeReq) -> bool {
        self.default_construct.covers(other.default_construct)
            && self.move_construct.covers(other.move_construct)
            && self.copy_construct.covers(other.copy_construct)
            && self.move_assign.covers(other.move_assign)
            && self.copy_assign.covers(other.copy_assign)
            && self.destruct.covers(other.destruct)
            && self.swap.covers(other.swap)
    }
}

impl PartialOrd for LifetimeReq {
    fn partial_cmp(&self, other: &LifetimeReq) -> Option<Ordering> {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Requirement level of a box, as a type.
///
/// Implemented only by [`Trivial`], [`Normal`] and [`Unique`].
pub trait Requirement: sealed::Sealed {
    /// The descriptor this requirement demands from every payload.
    const REQ: LifetimeReq;
}

/// Requirements whose boxes expose copy construction and copy assignment.
pub trait Copyable: Requirement {}

/// Implemented when `Self` is at least as strong as `R` on every operation.
///
/// A box of requirement `S` can be moved or copied into a box of requirement
/// `R` only when `S: Subsumes<R>`.
pub trait Subsumes<R: Requirement>: Requirement {}

/// Payloads are `Copy`; every operation is infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Trivial;

/// Payloads are `Clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Normal;

/// Payloads are move-only; copy operations do not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Unique;

impl sealed::Sealed for Trivial {}
impl sealed::Sealed for Normal {}
impl sealed::Sealed for Unique {}

impl Requirement for Trivial {
    const REQ: LifetimeReq = LifetimeReq::TRIVIAL;
}

impl Requirement for Normal {
    const REQ: LifetimeReq = LifetimeReq::NORMAL;
}

impl Requirement for Unique {
    const REQ: LifetimeReq = LifetimeReq::UNIQUE;
}

impl Copyable for Trivial {}
impl Copyable for Normal {}

impl Subsumes<Trivial> for Trivial {}
impl Subsumes<Normal> for Trivial {}
impl Subsumes<Unique> for Trivial {}
impl Subsumes<Normal> for Normal {}
impl Subsumes<Unique> for Normal {}
impl Subsumes<Unique> for Unique {}

/// Computes the [`LifetimeReq`] of a concrete type.
///
/// Moves, drops and swaps are always available in Rust and never panic by
/// themselves. Copies are `NoException` for `Copy` types, `WellFormed` for
/// `Clone` types and `IllFormed` otherwise; default construction is
/// `WellFormed` for `Default` types.
///
/// The probe resolves on the type as written at the call site, so inside a
/// generic function it only sees the bounds in scope.
///
/// # Example
///
/// ```
/// use anybox::lifetime_req;
/// use anybox::req::{Level, LifetimeReq};
///
/// struct Handle(u32);
///
/// assert!(lifetime_req!(u32) >= LifetimeReq::TRIVIAL);
/// assert_eq!(lifetime_req!(String).copy_construct, Level::WellFormed);
/// assert_eq!(lifetime_req!(Handle).copy_construct, Level::IllFormed);
/// assert!(lifetime_req!(Handle) < LifetimeReq::NORMAL);
/// ```
#[macro_export]
macro_rules! lifetime_req {
    ( $t: ty ) => {{
        #[allow(unused_imports)]
        use $crate::req::probe::{CloneProbe, CopyProbe, DefaultProbe, MoveProbe, NoDefaultProbe};
        let probe = $crate::req::probe::Probe::<$t>::new();
        $crate::req::LifetimeReq::probed((&&&probe).copy_level(), (&&probe).default_level())
    }};
}

#[doc(hidden)]
pub mod probe {
    use super::Level;
    use core::marker::PhantomData;

    pub struct Probe<T>(PhantomData<T>);

    impl<T> Probe<T> {
        pub const fn new() -> Self {
            Probe(PhantomData)
        }
    }

    pub trait CopyProbe {
        fn copy_level(&self) -> Level {
            Level::NoException
        }
    }

    impl<T: Copy> CopyProbe for &&Probe<T> {}

    pub trait CloneProbe {
        fn copy_level(&self) -> Level {
            Level::WellFormed
        }
    }

    impl<T: Clone> CloneProbe for &Probe<T> {}

    pub trait MoveProbe {
        fn copy_level(&self) -> Level {
            Level::IllFormed
        }
    }

    impl<T> MoveProbe for Probe<T> {}

    pub trait DefaultProbe {
        fn default_level(&self) -> Level {
            Level::WellFormed
        }
    }

    impl<T: Default> DefaultProbe for &Probe<T> {}

    pub trait NoDefaultProbe {
        fn default_level(&self) -> Level {
            Level::IllFormed
        }
    }

    impl<T> NoDefaultProbe for Probe<T> {}
}
