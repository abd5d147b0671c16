//! The managed-object header and the user-facing pointer types.
//!
//! Every heap-managed value lives inside a [`GcBox`]: a header word the
//! collector uses for sparse-set bookkeeping, a small per-type vtable of
//! monomorphised function pointers, and the value itself. Two pointer types
//! wrap it: [`Root`], a scoped handle that keeps its referent alive, and
//! [`GcRef`], the `Copy` non-owning reference objects hold to one another.

#![allow(clippy::ptr_as_ptr, clippy::ptr_cast_constness)]

use std::alloc::{dealloc, Layout};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::context::GcContext;
use crate::error::GcError;
use crate::roots::RootSlot;
use crate::trace::{Marker, Trace};

/// Type-erased pointer to a managed allocation. The header sits first in
/// every `GcBox` regardless of `T`, so erasing the value type keeps it
/// reachable.
pub(crate) type Erased = NonNull<GcBox<()>>;

// ============================================================================
// GcBox - the heap allocation container
// ============================================================================

/// The actual heap allocation wrapping the user's value.
#[repr(C)]
pub(crate) struct GcBox<T: Trace> {
    pub(crate) header: GcHeader,
    pub(crate) value: T,
}

/// Per-object bookkeeping embedded at the front of every allocation.
///
/// `info` packs the sparse-set location: bit 0 names which of the two dense
/// arrays currently owns the object, the remaining bits are its slot in that
/// array. The three function pointers are the object's vtable, chosen at
/// allocation time from the concrete `T`.
pub(crate) struct GcHeader {
    info: Cell<usize>,
    pub(crate) trace_fn: unsafe fn(*const u8, &mut Marker<'_>),
    pub(crate) drop_fn: unsafe fn(*mut u8),
    pub(crate) size_fn: unsafe fn(*const u8) -> usize,
}

impl GcHeader {
    pub(crate) fn new(
        trace_fn: unsafe fn(*const u8, &mut Marker<'_>),
        drop_fn: unsafe fn(*mut u8),
        size_fn: unsafe fn(*const u8) -> usize,
    ) -> Self {
        Self {
            info: Cell::new(0),
            trace_fn,
            drop_fn,
            size_fn,
        }
    }

    /// Header for an ordinary sized value of type `T`.
    pub(crate) fn for_value<T: Trace>() -> Self {
        Self::new(trace_value::<T>, drop_value::<T>, size_value::<T>)
    }

    /// Which dense array currently records the object.
    pub(crate) fn color(&self) -> usize {
        self.info.get() & 1
    }

    /// The object's slot within that array.
    pub(crate) fn index(&self) -> usize {
        self.info.get() >> 1
    }

    /// Stamp a new location. Color and index are only ever touched together.
    pub(crate) fn set_location(&self, color: usize, index: usize) {
        debug_assert!(color <= 1);
        self.info.set(color | (index << 1));
    }
}

// ============================================================================
// Per-type vtable entries
// ============================================================================

/// Forward a trace request to the value's `Trace` impl.
///
/// # Safety
///
/// `obj` must point to a live `GcBox<T>` allocated by this collector.
pub(crate) unsafe fn trace_value<T: Trace>(obj: *const u8, marker: &mut Marker<'_>) {
    let boxed = obj.cast::<GcBox<T>>();
    // SAFETY: caller guarantees a live GcBox<T>.
    unsafe { (*boxed).value.trace(marker) };
}

/// Drop the value in place and release the allocation.
///
/// # Safety
///
/// `obj` must point to a live `GcBox<T>` allocated by this collector; it is
/// invalid after the call.
unsafe fn drop_value<T: Trace>(obj: *mut u8) {
    let boxed = obj.cast::<GcBox<T>>();
    // SAFETY: caller guarantees a live GcBox<T> that is being destroyed
    // exactly once; the layout matches the allocation site.
    unsafe {
        ptr::drop_in_place(ptr::addr_of_mut!((*boxed).value));
        dealloc(obj, Layout::new::<GcBox<T>>());
    }
}

/// Byte footprint accounted against the collection threshold.
///
/// # Safety
///
/// `obj` must point to a live `GcBox<T>`.
unsafe fn size_value<T: Trace>(_obj: *const u8) -> usize {
    mem::size_of::<GcBox<T>>()
}

// ============================================================================
// GcRef - non-owning managed reference
// ============================================================================

/// A `Copy` reference to a managed object, for use *inside* other managed
/// objects.
///
/// A `GcRef` does not keep its referent alive; that is the job of the
/// [`Root`] handles and of the objects that report the reference from their
/// [`Trace::trace`] implementation. Dereferencing a `GcRef` whose referent
/// has become unreachable and been swept is undefined behavior; the
/// [`Trace`] contract exists precisely to rule that out for references that
/// are reported faithfully.
pub struct GcRef<T: Trace> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<*const T>,
}

impl<T: Trace> GcRef<T> {
    pub(crate) fn new(ptr: NonNull<GcBox<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn erased(self) -> Erased {
        self.ptr.cast()
    }

    /// Whether two references point at the same object.
    #[must_use]
    pub fn ptr_eq(a: Self, b: Self) -> bool {
        a.ptr == b.ptr
    }

    /// The byte footprint this object contributes to the heap budget.
    ///
    /// Constant over the object's lifetime.
    #[must_use]
    pub fn retained_size(self) -> usize {
        // SAFETY: self points at a live allocation under the Trace contract.
        unsafe { ((*self.ptr.as_ptr()).header.size_fn)(self.ptr.as_ptr().cast()) }
    }
}

impl<T: Trace> Copy for GcRef<T> {}

impl<T: Trace> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Trace> Deref for GcRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: self points at a live allocation under the Trace contract.
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: Trace + fmt::Debug> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Trace + fmt::Display> fmt::Display for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

// ============================================================================
// Root - scoped root handle
// ============================================================================

/// A scoped handle that keeps a managed object reachable.
///
/// Every `Root` owns one slot in its context's dense root registry; the slot
/// is claimed on creation and released deterministically when the handle is
/// dropped, on every exit path. Cloning a root registers a fresh slot
/// protecting the same object, so any number of handles may guard one
/// object independently.
///
/// The handle borrows its [`GcContext`], which is what makes "roots outliving
/// the collector" unrepresentable in safe code.
pub struct Root<'gc, T: Trace> {
    ctx: &'gc GcContext,
    /// Heap-pinned slot state. The registry holds a pointer to it and
    /// rewrites `idx` during compaction, so it must not move when the
    /// handle does.
    slot: NonNull<RootSlot>,
    _marker: PhantomData<*const T>,
}

impl<'gc, T: Trace> Root<'gc, T> {
    /// Claim a registry slot that does not protect anything yet.
    ///
    /// Allocation wires the object in afterwards via [`Root::attach`]; if
    /// construction fails the handle drops normally and the slot is
    /// released with nothing ever published.
    pub(crate) fn unattached(ctx: &'gc GcContext) -> Result<Self, GcError> {
        let slot = NonNull::from(Box::leak(Box::new(RootSlot::new())));
        if let Err(err) = ctx.register_root(slot) {
            // SAFETY: leaked just above and never registered.
            unsafe { drop(Box::from_raw(slot.as_ptr())) };
            return Err(err);
        }
        Ok(Self {
            ctx,
            slot,
            _marker: PhantomData,
        })
    }

    pub(crate) fn attach(&self, obj: Erased) {
        self.slot().ptr.set(Some(obj));
    }

    fn slot(&self) -> &RootSlot {
        // SAFETY: the slot is owned by this handle and freed only in Drop.
        unsafe { self.slot.as_ref() }
    }

    fn object(&self) -> NonNull<GcBox<T>> {
        self.slot()
            .ptr
            .get()
            .expect("root handle is not attached to an object")
            .cast()
    }

    /// A non-owning reference to the protected object, suitable for storing
    /// inside other managed objects.
    #[must_use]
    pub fn as_gc(&self) -> GcRef<T> {
        GcRef::new(self.object())
    }

    /// Retarget this handle at a different object.
    ///
    /// The handle keeps its registry slot; only the protected pointer
    /// changes. The previously protected object stays alive only if
    /// something else still reaches it.
    pub fn set(&mut self, target: GcRef<T>) {
        self.slot().ptr.set(Some(target.erased()));
    }

    /// Whether two handles protect the same object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.object() == b.object()
    }

    /// The byte footprint of the protected object. See
    /// [`GcRef::retained_size`].
    #[must_use]
    pub fn retained_size(&self) -> usize {
        self.as_gc().retained_size()
    }
}

impl<T: Trace> Deref for Root<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a root's referent is live by construction.
        unsafe { &self.object().as_ref().value }
    }
}

impl<T: Trace> Clone for Root<'_, T> {
    /// Register a fresh slot protecting the same object.
    ///
    /// # Panics
    ///
    /// Panics if the root registry has to grow and the allocation fails even
    /// after a rescue sweep. `Clone` has no error channel; fallible paths
    /// report [`GcError::OutOfMemory`](crate::GcError::OutOfMemory) instead.
    fn clone(&self) -> Self {
        let fresh = Self::unattached(self.ctx)
            .expect("failed to grow the root registry while cloning a root handle");
        fresh.slot().ptr.set(self.slot().ptr.get());
        fresh
    }
}

impl<T: Trace> Drop for Root<'_, T> {
    fn drop(&mut self) {
        self.ctx.unregister_root(self.slot().idx.get());
        // SAFETY: the registry entry was cleared above; this handle owns the
        // slot allocation.
        unsafe { drop(Box::from_raw(self.slot.as_ptr())) };
    }
}

impl<T: Trace + fmt::Debug> fmt::Debug for Root<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Trace + fmt::Display> fmt::Display for Root<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
