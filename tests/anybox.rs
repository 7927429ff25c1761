use std::alloc::Layout;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use anybox::allocator::{AllocError, Allocator, Global, Handle, RawAllocator};
use anybox::{AnyBox, LifetimeReq, Normal, NormalBox, Trivial, TrivialBox, Unique, UniqueBox};

#[derive(Default)]
struct Stats {
    allocs: Cell<usize>,
    frees: Cell<usize>,
    limit: Cell<Option<usize>>,
}

impl Stats {
    fn outstanding(&self) -> usize {
        self.allocs.get() - self.frees.get()
    }
}

/// Heap allocator whose instances are equal only when they share an id.
#[derive(Clone)]
struct Tracked {
    id: u32,
    stats: Rc<Stats>,
}

impl Tracked {
    fn new(id: u32, stats: &Rc<Stats>) -> Tracked {
        Tracked {
            id,
            stats: stats.clone(),
        }
    }
}

unsafe impl RawAllocator for Tracked {
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError> {
        if let Some(limit) = self.stats.limit.get() {
            if layout.size() > limit {
                return Err(AllocError::new(layout));
            }
        }
        self.stats.allocs.set(self.stats.allocs.get() + 1);
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, handle: Handle) {
        self.stats.frees.set(self.stats.frees.get() + 1);
        Global.deallocate(handle)
    }
}

unsafe impl Allocator for Tracked {
    fn is_equal(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[test]
fn concrete_scenario() {
    let mut b: NormalBox = NormalBox::default();
    assert!(!b.has_value());

    assert_eq!(*b.emplace(42i32), 42);
    assert!(b.is_type::<i32>());
    assert_eq!(unsafe { *b.get_unchecked::<i32>() }, 42);

    b.emplace(String::from("hi"));
    assert!(!b.is_type::<i32>());
    assert_eq!(unsafe { b.get_unchecked::<String>() }, "hi");

    b.reset();
    assert!(!b.has_value());
}

#[test]
fn round_trip() {
    let mut trivial: TrivialBox = TrivialBox::new();
    trivial.emplace((1u8, 2u64));
    assert_eq!(trivial.downcast_ref::<(u8, u64)>(), Some(&(1, 2)));

    let mut normal: NormalBox = NormalBox::new();
    normal.emplace(vec![1, 2, 3]);
    normal.downcast_mut::<Vec<i32>>().unwrap().push(4);
    assert_eq!(normal.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3, 4]));

    let mut unique: UniqueBox = UniqueBox::new();
    let offset = 10;
    unique.emplace(Box::new(move |x: u32| x + offset) as Box<dyn Fn(u32) -> u32>);
    let f = unique.downcast_ref::<Box<dyn Fn(u32) -> u32>>().unwrap();
    assert_eq!(f(5), 15);
}

#[test]
fn type_identity() {
    let b: NormalBox = NormalBox::from_value(7u16);
    assert!(b.is_type::<u16>());
    assert!(!b.is_type::<i16>());
    assert!(!b.is_type::<u32>());
    assert_eq!(b.type_id(), Some(std::any::TypeId::of::<u16>()));
    assert_eq!(b.type_name(), Some("u16"));
    assert_eq!(b.type_size(), 2);
    assert!(b.downcast_ref::<i16>().is_none());
}

#[test]
fn reset_is_idempotent() {
    let stats = Rc::new(Stats::default());
    let mut b: AnyBox<Unique, Tracked> = AnyBox::new_in_place(Tracked::new(0, &stats), [0u8; 16]);
    assert_eq!(stats.outstanding(), 1);

    b.reset();
    assert!(!b.has_value());
    assert_eq!(b.type_size(), 0);
    b.reset();
    assert!(!b.has_value());
    assert_eq!(stats.allocs.get(), 1);
    assert_eq!(stats.frees.get(), 1);
}

#[test]
fn emplace_same_type_reallocates() {
    let stats = Rc::new(Stats::default());
    let mut b: AnyBox<Trivial, Tracked> = AnyBox::new_in(Tracked::new(0, &stats));
    b.emplace(1u64);
    b.emplace(2u64);
    assert_eq!(b.downcast_ref::<u64>(), Some(&2));
    assert_eq!(stats.allocs.get(), 2);
    assert_eq!(stats.outstanding(), 1);
}

#[test]
fn take_empties_source() {
    let mut source: NormalBox = NormalBox::from_value(String::from("moved"));
    let before: *const String = source.downcast_ref::<String>().unwrap();

    let moved = source.take();
    assert!(!source.has_value());
    assert_eq!(moved.downcast_ref::<String>().unwrap(), "moved");

    // storage handed over, not copied
    let after: *const String = moved.downcast_ref::<String>().unwrap();
    assert_eq!(before, after);
}

#[test]
fn take_with_equal_allocator_steals() {
    let stats = Rc::new(Stats::default());
    let alloc = Tracked::new(1, &stats);
    let mut source: AnyBox<Normal, Tracked> = AnyBox::new_in_place(alloc, vec![1u8; 4]);

    let moved = source.take();
    assert!(!source.has_value());
    assert_eq!(moved.downcast_ref::<Vec<u8>>(), Some(&vec![1u8; 4]));
    assert_eq!(stats.allocs.get(), 1);
}

#[test]
fn take_in_relocates_between_allocators() {
    let stats = Rc::new(Stats::default());
    let token = Rc::new(());
    let alloc = Tracked::new(1, &stats);
    let mut source: AnyBox<Unique, Tracked> = AnyBox::new_in_place(alloc, token.clone());

    let moved = source.take_in(Tracked::new(2, &stats)).unwrap();
    assert!(!source.has_value());
    assert_eq!(moved.allocator().id, 2);
    assert!(moved.is_type::<Rc<()>>());
    assert_eq!(stats.allocs.get(), 2);
    assert_eq!(stats.frees.get(), 1);
    assert_eq!(Rc::strong_count(&token), 2);

    drop(moved);
    assert_eq!(Rc::strong_count(&token), 1);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn take_in_failure_keeps_source() {
    let stats = Rc::new(Stats::default());
    let alloc = Tracked::new(1, &stats);
    let mut source: AnyBox<Unique, Tracked> = AnyBox::new_in_place(alloc, [7u8; 64]);

    stats.limit.set(Some(8));
    let err = source.take_in(Tracked::new(2, &stats)).unwrap_err();
    assert_eq!(err.layout(), Layout::new::<[u8; 64]>());
    assert_eq!(source.downcast_ref::<[u8; 64]>(), Some(&[7u8; 64]));
}

#[test]
fn clone_is_independent() {
    let b: NormalBox = NormalBox::from_value(vec![1, 2, 3]);
    let mut c = b.clone();
    c.downcast_mut::<Vec<i32>>().unwrap().push(4);
    assert_eq!(b.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3]));
    assert_eq!(c.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3, 4]));

    let empty: TrivialBox = TrivialBox::new();
    assert!(!empty.clone().has_value());
}

#[test]
fn copy_from_weaker_or_equal_requirement() {
    let trivial: TrivialBox = TrivialBox::from_value(3u32);
    let mut normal: NormalBox = NormalBox::from_value(String::from("old"));

    normal.copy_from(&trivial);
    assert_eq!(normal.downcast_ref::<u32>(), Some(&3));
    assert_eq!(trivial.downcast_ref::<u32>(), Some(&3));

    let copy: AnyBox<Normal> = AnyBox::from_copy(&trivial, Global).unwrap();
    assert_eq!(copy.downcast_ref::<u32>(), Some(&3));
}

#[test]
fn copy_from_same_type_reuses_storage() {
    let stats = Rc::new(Stats::default());
    let (first, second) = (Tracked::new(1, &stats), Tracked::new(2, &stats));
    let src: AnyBox<Normal, Tracked> = AnyBox::new_in_place(first, String::from("source"));
    let mut dst: AnyBox<Normal, Tracked> = AnyBox::new_in_place(second, String::from("dest"));
    assert_eq!(stats.allocs.get(), 2);

    dst.copy_from(&src);
    assert_eq!(dst.downcast_ref::<String>().unwrap(), "source");
    assert_eq!(stats.allocs.get(), 2);
}

#[test]
fn copy_from_other_type_reuses_storage_that_fits() {
    let stats = Rc::new(Stats::default());
    let alloc = Tracked::new(1, &stats);
    let small: AnyBox<Trivial, Tracked> = AnyBox::new_in_place(alloc.clone(), 9u8);
    let large: AnyBox<Trivial, Tracked> = AnyBox::new_in_place(alloc.clone(), [5u64; 4]);

    let mut dst: AnyBox<Trivial, Tracked> = AnyBox::new_in_place(alloc.clone(), [0u64; 4]);
    assert_eq!(stats.allocs.get(), 3);

    dst.copy_from(&small);
    assert_eq!(dst.downcast_ref::<u8>(), Some(&9));
    assert_eq!(dst.type_size(), 1);
    assert_eq!(stats.allocs.get(), 3);

    dst.copy_from(&large);
    assert_eq!(dst.downcast_ref::<[u64; 4]>(), Some(&[5u64; 4]));
    assert_eq!(stats.allocs.get(), 3);

    let mut tiny: AnyBox<Trivial, Tracked> = AnyBox::new_in_place(alloc, 1u8);
    tiny.copy_from(&large);
    assert_eq!(stats.allocs.get(), 5);
    assert_eq!(stats.frees.get(), 1);
}

#[test]
fn failed_assignment_leaves_destination_empty() {
    let stats = Rc::new(Stats::default());
    let src: AnyBox<Normal, Tracked> = AnyBox::new_in_place(Tracked::new(1, &stats), [1u64; 8]);
    let mut dst: AnyBox<Normal, Tracked> = AnyBox::new_in_place(Tracked::new(1, &stats), 1u64);

    stats.limit.set(Some(8));
    assert!(dst.try_copy_from(&src).is_err());
    assert!(!dst.has_value());
    assert!(src.has_value());
    assert_eq!(stats.outstanding(), 1);

    let mut other: AnyBox<Normal, Tracked> = AnyBox::new_in(Tracked::new(2, &stats));
    let mut src = src;
    assert!(other.try_move_from(&mut src).is_err());
    assert!(!other.has_value());
    assert_eq!(src.downcast_ref::<[u64; 8]>(), Some(&[1u64; 8]));
}

#[test]
fn failed_emplace_leaves_box_empty() {
    let stats = Rc::new(Stats::default());
    let token = Rc::new(());
    let mut b: AnyBox<Unique, Tracked> = AnyBox::new_in_place(Tracked::new(1, &stats), 1u8);

    stats.limit.set(Some(8));
    assert!(b.try_emplace((token.clone(), [0u8; 16])).is_err());
    assert!(!b.has_value());
    assert_eq!(Rc::strong_count(&token), 1);
    assert_eq!(stats.outstanding(), 0);

    let result = AnyBox::<Unique, Tracked>::try_new_in_place(
        Tracked::new(1, &stats),
        (token.clone(), [0u64; 4]),
    );
    assert!(result.is_err());
    assert_eq!(Rc::strong_count(&token), 1);
    assert_eq!(stats.outstanding(), 0);
}

#[derive(Debug)]
struct PanicOnClone;

impl Clone for PanicOnClone {
    fn clone(&self) -> PanicOnClone {
        panic!("clone failed");
    }
}

struct PanicOnDrop;

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        panic!("drop failed");
    }
}

#[test]
fn panicking_clone_releases_storage() {
    let stats = Rc::new(Stats::default());
    let b: AnyBox<Normal, Tracked> = AnyBox::new_in_place(Tracked::new(1, &stats), PanicOnClone);
    assert_eq!(stats.outstanding(), 1);

    let result = panic::catch_unwind(AssertUnwindSafe(|| b.try_clone_in(Tracked::new(2, &stats))));
    assert!(result.is_err());
    assert_eq!(stats.allocs.get(), 2);
    assert_eq!(stats.outstanding(), 1);
    assert!(b.is_type::<PanicOnClone>());

    drop(b);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn panicking_drop_releases_storage() {
    let stats = Rc::new(Stats::default());
    let mut b: AnyBox<Unique, Tracked> = AnyBox::new_in_place(Tracked::new(1, &stats), PanicOnDrop);

    let result = panic::catch_unwind(AssertUnwindSafe(|| b.reset()));
    assert!(result.is_err());
    assert!(!b.has_value());
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn move_from_weaker_requirement() {
    let mut src: TrivialBox = TrivialBox::from_value(11i64);
    let mut dst: UniqueBox = UniqueBox::from_value(String::from("replaced"));

    dst.move_from(&mut src);
    assert!(!src.has_value());
    assert_eq!(dst.downcast_ref::<i64>(), Some(&11));

    let mut empty: NormalBox = NormalBox::new();
    dst.move_from(&mut empty);
    assert!(!dst.has_value());
}

#[test]
fn move_from_distinct_allocators_is_elementwise() {
    let stats = Rc::new(Stats::default());
    let token = Rc::new(());
    let (first, second) = (Tracked::new(1, &stats), Tracked::new(2, &stats));
    let mut src: AnyBox<Normal, Tracked> = AnyBox::new_in_place(first, token.clone());
    let mut dst: AnyBox<Unique, Tracked> = AnyBox::new_in_place(second, token.clone());
    assert_eq!(Rc::strong_count(&token), 3);

    dst.move_from(&mut src);
    assert!(!src.has_value());
    assert!(dst.is_type::<Rc<()>>());
    assert_eq!(dst.allocator().id, 2);
    assert_eq!(Rc::strong_count(&token), 2);
    // same payload type: moved into the existing value
    assert_eq!(stats.allocs.get(), 2);
    assert_eq!(stats.frees.get(), 1);

    drop(dst);
    assert_eq!(Rc::strong_count(&token), 1);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn move_from_propagates_allocator() {
    let stats = Rc::new(Stats::default());
    let first = Tracked::new(1, &stats);
    let second = Tracked::new(2, &stats);
    let third = Tracked::new(3, &stats);

    let mut src: AnyBox<Normal, &Tracked> = AnyBox::new_in_place(&first, 5u32);
    let mut dst: AnyBox<Normal, &Tracked> = AnyBox::new_in(&second);

    dst.move_from(&mut src);
    assert_eq!(dst.allocator().id, 1);
    assert_eq!(src.allocator().id, 2);
    assert_eq!(dst.downcast_ref::<u32>(), Some(&5));
    assert_eq!(stats.allocs.get(), 1);

    // an empty source still hands its allocator over
    let mut empty: AnyBox<Normal, &Tracked> = AnyBox::new_in(&third);
    dst.move_from(&mut empty);
    assert!(!dst.has_value());
    assert_eq!(dst.allocator().id, 3);
    assert_eq!(empty.allocator().id, 1);
    assert_eq!(stats.outstanding(), 0);
}

/// Propagating allocator whose clones are fresh, unequal arenas.
struct Arena(Tracked);

impl Clone for Arena {
    fn clone(&self) -> Arena {
        Arena(Tracked::new(self.0.id + 1, &self.0.stats))
    }
}

unsafe impl RawAllocator for Arena {
    fn allocate(&self, layout: Layout) -> Result<Handle, AllocError> {
        self.0.allocate(layout)
    }

    unsafe fn deallocate(&self, handle: Handle) {
        self.0.deallocate(handle)
    }
}

unsafe impl Allocator for Arena {
    const PROPAGATE_ON_MOVE: bool = true;

    fn is_equal(&self, other: &Self) -> bool {
        self.0.is_equal(&other.0)
    }
}

#[test]
fn take_relocates_into_unequal_clone() {
    let stats = Rc::new(Stats::default());
    let alloc = Arena(Tracked::new(1, &stats));
    let mut source: AnyBox<Normal, Arena> = AnyBox::new_in_place(alloc, String::from("arena"));

    let moved = source.take();
    assert!(!source.has_value());
    assert_eq!(moved.allocator().0.id, 2);
    assert_eq!(moved.downcast_ref::<String>().unwrap(), "arena");
    assert_eq!(stats.allocs.get(), 2);
    assert_eq!(stats.frees.get(), 1);

    drop(moved);
    assert_eq!(stats.outstanding(), 0);
}

#[test]
fn convert_to_weaker_requirement() {
    let b: TrivialBox = TrivialBox::from_value(1.5f32);
    let b: NormalBox = b.convert();
    assert_eq!(NormalBox::<Global>::requirement(), LifetimeReq::NORMAL);
    let b: UniqueBox = b.convert();
    assert_eq!(b.downcast::<f32>().ok(), Some(1.5));
}

#[test]
fn swap_payloads() {
    let mut a: NormalBox = NormalBox::from_value(String::from("a"));
    let mut b: NormalBox = NormalBox::from_value(String::from("b"));
    a.swap(&mut b);
    assert_eq!(a.downcast_ref::<String>().unwrap(), "b");
    assert_eq!(b.downcast_ref::<String>().unwrap(), "a");

    let mut c: NormalBox = NormalBox::from_value(3u8);
    a.swap(&mut c);
    assert_eq!(a.downcast_ref::<u8>(), Some(&3));
    assert_eq!(c.downcast_ref::<String>().unwrap(), "b");

    let mut empty: NormalBox = NormalBox::new();
    a.swap(&mut empty);
    assert!(!a.has_value());
    assert_eq!(empty.downcast_ref::<u8>(), Some(&3));
}

#[test]
fn drops_every_payload_once() {
    let token = Rc::new(());
    {
        let mut a: NormalBox = NormalBox::from_value(token.clone());
        let b = a.clone();
        let mut c: NormalBox = NormalBox::new();
        c.copy_from(&a);
        assert_eq!(Rc::strong_count(&token), 4);

        c.emplace(1u8);
        a.emplace(token.clone());
        assert_eq!(Rc::strong_count(&token), 3);

        drop(b);
        a.reset();
        assert_eq!(Rc::strong_count(&token), 1);
        a.emplace(token.clone());
    }
    assert_eq!(Rc::strong_count(&token), 1);
}

#[test]
fn downcast_by_value() {
    let b: UniqueBox = UniqueBox::from_value(String::from("owned"));
    let b = match b.downcast::<&str>() {
        Ok(_) => unreachable!(),
        Err(b) => b,
    };
    assert_eq!(b.downcast::<String>().unwrap(), "owned");
}

#[test]
fn holds_futures() {
    use futures::future::{BoxFuture, FutureExt};

    let mut b: UniqueBox = UniqueBox::new();
    b.emplace(async { 7u32 }.boxed());
    assert!(b.is_type::<BoxFuture<'static, u32>>());

    let fut = b.downcast::<BoxFuture<'static, u32>>().ok().unwrap();
    assert_eq!(futures::executor::block_on(fut), 7);
}

#[test]
fn debug_output() {
    let b: TrivialBox = TrivialBox::from_value(0u32);
    assert_eq!(format!("{:?}", b), r#"AnyBox { type: "u32", size: 4 }"#);
}
