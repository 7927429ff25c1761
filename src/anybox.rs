use core::any::TypeId;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ptr;

#[cfg(not(feature = "std"))]
use alloc::alloc::handle_alloc_error;
#[cfg(feature = "std")]
use std::alloc::handle_alloc_error;

use log::trace;

use crate::allocator::{self, AllocError, Allocator, Global, Handle};
use crate::dispatch::{Admits, DispatchTable};
use crate::req::{Copyable, LifetimeReq, Requirement, Subsumes};

/// A type-erased, allocator-aware box.
///
/// Holds at most one value of any `'static` type accepted by the requirement
/// `R`, in storage obtained from `A`. After construction the box only knows
/// its payload through a [`DispatchTable`], which it uses to copy, move, swap
/// and drop the value.
///
/// `R` decides which operations exist: `AnyBox<Unique, A>` never implements
/// `Clone`, and moving or copying between boxes of different requirements is
/// only possible towards a weaker one.
///
/// # Example
///
/// ```
/// use anybox::NormalBox;
///
/// let mut b: NormalBox = NormalBox::new();
/// assert!(!b.has_value());
///
/// b.emplace(42i32);
/// assert_eq!(b.downcast_ref::<i32>(), Some(&42));
///
/// b.emplace(String::from("hi"));
/// assert!(b.is_type::<String>());
/// assert_eq!(b.downcast_ref::<String>().map(String::as_str), Some("hi"));
///
/// b.reset();
/// assert!(!b.has_value());
/// ```
pub struct AnyBox<R: Requirement, A: Allocator = Global> {
    table: Option<&'static DispatchTable>,
    handle: Handle,
    alloc: A,
    _req: PhantomData<R>,
}

impl<R: Requirement, A: Allocator> AnyBox<R, A> {
    /// An empty box using `alloc`.
    pub const fn new_in(alloc: A) -> AnyBox<R, A> {
        AnyBox {
            table: None,
            handle: Handle::empty(),
            alloc,
            _req: PhantomData,
        }
    }

    /// An empty box using the default allocator.
    pub fn new() -> AnyBox<R, A>
    where
        A: Default,
    {
        AnyBox::new_in(A::default())
    }

    /// A box holding `value`, using the default allocator.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if the allocation fails.
    pub fn from_value<T: 'static>(value: T) -> AnyBox<R, A>
    where
        R: Admits<T>,
        A: Default,
    {
        AnyBox::new_in_place(A::default(), value)
    }

    /// A box using `alloc` and holding `value`.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if the allocation fails.
    pub fn new_in_place<T: 'static>(alloc: A, value: T) -> AnyBox<R, A>
    where
        R: Admits<T>,
    {
        let mut this = AnyBox::new_in(alloc);
        this.emplace(value);
        this
    }

    /// A box using `alloc` and holding `value`, or the allocation error.
    pub fn try_new_in_place<T: 'static>(
        alloc: A,
        value: T,
    ) -> Result<AnyBox<R, A>, AllocError>
    where
        R: Admits<T>,
    {
        let mut this = AnyBox::new_in(alloc);
        this.try_emplace(value)?;
        Ok(this)
    }

    /// Replaces the payload with `value` and returns a reference to it.
    ///
    /// The old payload is always dropped and its storage released first, even
    /// when it has the same type.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if the allocation fails.
    pub fn emplace<T: 'static>(&mut self, value: T) -> &mut T
    where
        R: Admits<T>,
    {
        match self.try_emplace(value) {
            Ok(value) => value,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    /// Replaces the payload with `value`.
    ///
    /// On allocation failure the box is left empty and `value` is dropped.
    pub fn try_emplace<T: 'static>(&mut self, value: T) -> Result<&mut T, AllocError>
    where
        R: Admits<T>,
    {
        let table = R::table();
        debug_assert!(table.req().dominates(&R::REQ));

        self.reset();
        self.handle = allocator::allocate(&self.alloc, table.layout())?;
        unsafe {
            allocator::construct(&self.alloc, &self.handle, value);
            self.table = Some(table);
            Ok(self.get_unchecked_mut::<T>())
        }
    }

    /// Drops the payload and releases its storage. Does nothing on an empty box.
    pub fn reset(&mut self) {
        if let Some(table) = self.table.take() {
            // a panicking drop still releases the storage
            let handle = mem::take(&mut self.handle);
            let guard = allocator::AllocGuard::new(&self.alloc, handle);
            unsafe { table.destroy(&self.alloc, guard.handle(), true) };
        } else {
            self.release();
        }
    }

    /// Releases the storage without dropping anything in it.
    fn release(&mut self) {
        let handle = mem::take(&mut self.handle);
        unsafe { allocator::deallocate(&self.alloc, handle) }
    }

    /// Drops the payload but keeps the storage.
    fn destroy_in_place(&mut self) {
        if let Some(table) = self.table.take() {
            unsafe { table.destroy(&self.alloc, &self.handle, true) };
        }
    }

    /// Returns true if the box holds a value.
    pub fn has_value(&self) -> bool {
        self.table.is_some()
    }

    /// Returns true if the box holds a `T`.
    pub fn is_type<T: 'static>(&self) -> bool {
        self.table.is_some_and(|table| table.is::<T>())
    }

    /// Size of the payload in bytes, zero when empty.
    pub fn type_size(&self) -> usize {
        self.table.map_or(0, |table| table.size())
    }

    /// Type tag of the payload.
    pub fn type_id(&self) -> Option<TypeId> {
        self.table.map(|table| table.type_id())
    }

    /// Name of the payload type.
    pub fn type_name(&self) -> Option<&'static str> {
        self.table.map(|table| table.type_name())
    }

    /// The dispatch table of the payload.
    pub fn table(&self) -> Option<&'static DispatchTable> {
        self.table
    }

    /// The requirement every payload of this box meets.
    pub const fn requirement() -> LifetimeReq {
        R::REQ
    }

    /// The allocator of this box.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns a reference to the payload without checking its type.
    ///
    /// # Safety
    ///
    /// The box must hold a `T`, see [`is_type`](AnyBox::is_type).
    pub unsafe fn get_unchecked<T: 'static>(&self) -> &T {
        debug_assert!(self.is_type::<T>());
        let ptr = allocator::address(&self.alloc, &self.handle);
        &*ptr.cast::<T>().as_ptr()
    }

    /// Returns a mutable reference to the payload without checking its type.
    ///
    /// # Safety
    ///
    /// The box must hold a `T`, see [`is_type`](AnyBox::is_type).
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self) -> &mut T {
        debug_assert!(self.is_type::<T>());
        let ptr = allocator::address(&self.alloc, &self.handle);
        &mut *ptr.cast::<T>().as_ptr()
    }

    /// Returns a reference to the payload if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if self.is_type::<T>() {
            Some(unsafe { self.get_unchecked() })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the payload if it is a `T`.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if self.is_type::<T>() {
            Some(unsafe { self.get_unchecked_mut() })
        } else {
            None
        }
    }

    /// Moves the payload out if it is a `T`, otherwise gives the box back.
    pub fn downcast<T: 'static>(mut self) -> Result<T, Self> {
        if !self.is_type::<T>() {
            return Err(self);
        }
        let value = unsafe {
            allocator::address(&self.alloc, &self.handle)
                .cast::<T>()
                .as_ptr()
                .read()
        };
        self.table = None;
        self.release();
        Ok(value)
    }

    /// Moves the payload into a new box and leaves this one empty.
    ///
    /// The new box gets a copy of the allocator. When the allocator is
    /// always-equal or compares equal to its copy, the storage is handed over
    /// as is; otherwise the payload is relocated into storage from the copy.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if a relocation fails.
    pub fn take(&mut self) -> AnyBox<R, A>
    where
        A: Clone,
    {
        let alloc = self.alloc.clone();
        if A::ALWAYS_EQUAL || self.alloc.is_equal(&alloc) {
            let mut out = AnyBox::new_in(alloc);
            out.adopt(self);
            return out;
        }
        match self.relocate_into(alloc) {
            Ok(out) => out,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    /// Moves the payload into a new box using `alloc` and leaves this one empty.
    ///
    /// On failure this box keeps its payload.
    pub fn take_in(&mut self, alloc: A) -> Result<AnyBox<R, A>, AllocError> {
        if A::ALWAYS_EQUAL || self.alloc.is_equal(&alloc) {
            let mut out = AnyBox::new_in(alloc);
            out.adopt(self);
            return Ok(out);
        }
        self.relocate_into(alloc)
    }

    fn relocate_into(&mut self, alloc: A) -> Result<AnyBox<R, A>, AllocError> {
        let mut out = AnyBox::new_in(alloc);
        if let Some(table) = self.table {
            trace!("relocating {} between allocators", table.type_name());
            out.handle = unsafe { table.move_construct(&out.alloc, &self.alloc, &self.handle)? };
            out.table = Some(table);
            // moved-from: release without dropping
            self.table = None;
            self.release();
        }
        Ok(out)
    }

    /// Takes over the payload and storage of `src`, which must share a
    /// compatible allocator. `self` must be empty.
    fn adopt<S: Requirement>(&mut self, src: &mut AnyBox<S, A>) {
        debug_assert!(!self.has_value());
        self.release();
        self.table = src.table.take();
        self.handle = mem::take(&mut src.handle);
    }

    /// Moves the payload of `src` into this box and leaves `src` empty.
    ///
    /// A propagating allocator travels with the payload: the two boxes
    /// exchange allocators, also when `src` is empty. Equal allocators hand
    /// the storage over. Otherwise
    /// the payload is moved element-wise: into the current payload when both
    /// have the same type, or into storage that fits.
    ///
    /// On allocation failure this box is left empty and `src` keeps its payload.
    pub fn try_move_from<S>(&mut self, src: &mut AnyBox<S, A>) -> Result<(), AllocError>
    where
        S: Subsumes<R>,
    {
        if A::PROPAGATE_ON_MOVE {
            self.reset();
            mem::swap(&mut self.alloc, &mut src.alloc);
            self.adopt(src);
            return Ok(());
        }

        let Some(table) = src.table else {
            self.reset();
            return Ok(());
        };

        if A::ALWAYS_EQUAL || self.alloc.is_equal(&src.alloc) {
            self.reset();
            self.adopt(src);
            return Ok(());
        }

        let has_value = self.prepare_for(table);
        let moved = unsafe {
            table.move_assign(
                &self.alloc,
                &mut self.handle,
                has_value,
                &src.alloc,
                &src.handle,
            )
        };
        self.finish_assign(table, moved)?;
        src.table = None;
        src.release();
        Ok(())
    }

    /// Moves the payload of `src` into this box, see [`try_move_from`](AnyBox::try_move_from).
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if an allocation fails.
    pub fn move_from<S>(&mut self, src: &mut AnyBox<S, A>)
    where
        S: Subsumes<R>,
    {
        if let Err(err) = self.try_move_from(src) {
            handle_alloc_error(err.layout())
        }
    }

    /// Copies the payload of `src` into this box.
    ///
    /// When both hold the same type the current payload is updated with
    /// `clone_from` and no allocation happens. Otherwise the current payload
    /// is dropped first, and its storage reused if the new payload fits.
    ///
    /// On allocation failure this box is left empty.
    pub fn try_copy_from<S>(&mut self, src: &AnyBox<S, A>) -> Result<(), AllocError>
    where
        R: Copyable,
        S: Copyable + Subsumes<R>,
    {
        let Some(table) = src.table else {
            self.reset();
            return Ok(());
        };

        let has_value = self.prepare_for(table);
        let copied = unsafe {
            table.copy_assign(
                &self.alloc,
                &mut self.handle,
                has_value,
                &src.alloc,
                &src.handle,
            )
        };
        match copied {
            Some(result) => self.finish_assign(table, result),
            None => unreachable!("copyable requirement without copy entries"),
        }
    }

    /// Copies the payload of `src` into this box, see [`try_copy_from`](AnyBox::try_copy_from).
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if an allocation fails.
    pub fn copy_from<S>(&mut self, src: &AnyBox<S, A>)
    where
        R: Copyable,
        S: Copyable + Subsumes<R>,
    {
        if let Err(err) = self.try_copy_from(src) {
            handle_alloc_error(err.layout())
        }
    }

    /// Gets the box ready to receive a payload described by `incoming`.
    ///
    /// Returns true if the current payload has the same type and stays in
    /// place. Otherwise the payload is dropped, storage that cannot hold the
    /// incoming type is released, and false is returned.
    fn prepare_for(&mut self, incoming: &'static DispatchTable) -> bool {
        if let Some(current) = self.table {
            if current.same_type(incoming) {
                return true;
            }
        }
        self.destroy_in_place();
        if !self.handle.is_empty() && !self.handle.fits(incoming.layout()) {
            trace!(
                "reallocating {} bytes for {}",
                incoming.size(),
                incoming.type_name()
            );
            self.release();
        }
        false
    }

    fn finish_assign(
        &mut self,
        table: &'static DispatchTable,
        result: Result<(), AllocError>,
    ) -> Result<(), AllocError> {
        match result {
            Ok(()) => {
                self.table = Some(table);
                Ok(())
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// A new box using `alloc` with a copy of the payload of `src`.
    pub fn from_copy<S>(src: &AnyBox<S, A>, alloc: A) -> Result<AnyBox<R, A>, AllocError>
    where
        S: Copyable + Subsumes<R>,
    {
        let mut out = AnyBox::new_in(alloc);
        if let Some(table) = src.table {
            match unsafe { table.copy_construct(&out.alloc, &src.alloc, &src.handle) } {
                Some(handle) => out.handle = handle?,
                None => unreachable!("copyable requirement without copy entries"),
            }
            out.table = Some(table);
        }
        Ok(out)
    }

    /// A copy of this box using `alloc`.
    pub fn try_clone_in(&self, alloc: A) -> Result<AnyBox<R, A>, AllocError>
    where
        R: Copyable + Subsumes<R>,
    {
        AnyBox::from_copy(self, alloc)
    }

    /// Turns this box into a box of a weaker requirement.
    ///
    /// ```
    /// use anybox::{NormalBox, UniqueBox};
    ///
    /// let normal: NormalBox = NormalBox::from_value(vec![1, 2, 3]);
    /// let unique: UniqueBox = normal.convert();
    /// assert_eq!(unique.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3]));
    /// ```
    ///
    /// Strengthening does not compile:
    ///
    /// ```compile_fail
    /// use anybox::{NormalBox, UniqueBox};
    ///
    /// let unique: UniqueBox = UniqueBox::from_value(vec![1, 2, 3]);
    /// let normal: NormalBox = unique.convert();
    /// ```
    pub fn convert<D>(self) -> AnyBox<D, A>
    where
        D: Requirement,
        R: Subsumes<D>,
    {
        let this = ManuallyDrop::new(self);
        unsafe {
            AnyBox {
                table: this.table,
                handle: ptr::read(&this.handle),
                alloc: ptr::read(&this.alloc),
                _req: PhantomData,
            }
        }
    }

    /// Exchanges the payloads of two boxes.
    ///
    /// Payloads of the same type are swapped in place. Otherwise the two boxes
    /// are exchanged whole, allocators included, which never allocates.
    pub fn swap(&mut self, other: &mut AnyBox<R, A>) {
        if let (Some(a), Some(b)) = (self.table, other.table) {
            if a.same_type(b) {
                unsafe { a.swap(&self.alloc, &self.handle, &other.alloc, &other.handle) };
                return;
            }
        }
        mem::swap(self, other);
    }
}

impl<R: Requirement, A: Allocator> Drop for AnyBox<R, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<R: Requirement, A: Allocator + Default> Default for AnyBox<R, A> {
    fn default() -> Self {
        AnyBox::new()
    }
}

impl<R: Copyable + Subsumes<R>, A: Allocator + Clone> Clone for AnyBox<R, A> {
    fn clone(&self) -> Self {
        match self.try_clone_in(self.alloc.clone()) {
            Ok(copy) => copy,
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.copy_from(source)
    }
}

impl<R: Requirement, A: Allocator> fmt::Debug for AnyBox<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.table {
            Some(table) => f
                .debug_struct("AnyBox")
                .field("type", &table.type_name())
                .field("size", &table.size())
                .finish(),
            None => f.write_str("AnyBox(<empty>)"),
        }
    }
}
