//! The managed array: a variable-length sequence allocated in one block.
//!
//! A [`GcArray<T>`] occupies a single allocation of `header + n * element`;
//! the element storage trails the length field. Whether a collection walks
//! into the elements is decided by `T`'s [`Trace`] implementation at
//! monomorphisation time: arrays of plain values trace as a no-op, arrays of
//! managed references mark every element.

use std::alloc::{self, Layout, LayoutError};
use std::mem;
use std::ops::Index;
use std::ptr;
use std::slice;

use crate::context::GcContext;
use crate::error::GcError;
use crate::ptr::{trace_value, GcBox, GcHeader};
use crate::trace::{Marker, Trace};
use crate::Root;

/// A fixed-length managed sequence of `T`.
///
/// Constructed only through [`GcContext::alloc_array`] and
/// [`GcContext::alloc_array_with`]; the element storage lives directly
/// behind this struct in the same allocation. Elements are immutable through
/// the shared references handed out here; use interior mutability (for
/// example `Cell<Option<GcRef<T>>>` elements) for slots that change after
/// construction.
#[repr(C)]
pub struct GcArray<T: Trace> {
    len: usize,
    data: [T; 0],
}

impl<T: Trace> GcArray<T> {
    /// Layout of the whole allocation for `len` elements.
    pub(crate) fn layout(len: usize) -> Result<Layout, LayoutError> {
        let (layout, _) = Layout::new::<GcBox<Self>>().extend(Layout::array::<T>(len)?)?;
        Ok(layout.pad_to_align())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array has zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: construction initialises exactly `len` trailing elements.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// The element at `index`, or `None` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T: Trace> Index<usize> for GcArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<'a, T: Trace> IntoIterator for &'a GcArray<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// SAFETY: element-wise forwarding; for element types without managed
// references this compiles down to nothing.
unsafe impl<T: Trace> Trace for GcArray<T> {
    fn trace(&self, marker: &mut Marker<'_>) {
        for element in self.as_slice() {
            element.trace(marker);
        }
    }
}

// ============================================================================
// Vtable entries for arrays
// ============================================================================

/// Destroy an array allocation: elements in reverse order, then the block.
///
/// # Safety
///
/// `obj` must point to a live `GcBox<GcArray<T>>` allocated by this
/// collector; it is invalid after the call.
unsafe fn drop_array<T: Trace>(obj: *mut u8) {
    let boxed = obj.cast::<GcBox<GcArray<T>>>();
    // SAFETY: caller guarantees a live array box destroyed exactly once.
    unsafe {
        let len = (*boxed).value.len;
        let data = ptr::addr_of_mut!((*boxed).value.data).cast::<T>();
        for i in (0..len).rev() {
            ptr::drop_in_place(data.add(i));
        }
        let layout =
            GcArray::<T>::layout(len).expect("array layout was computed at allocation time");
        alloc::dealloc(obj, layout);
    }
}

/// True footprint of an array allocation, trailing elements included.
///
/// # Safety
///
/// `obj` must point to a live `GcBox<GcArray<T>>`.
unsafe fn size_array<T: Trace>(obj: *const u8) -> usize {
    let boxed = obj.cast::<GcBox<GcArray<T>>>();
    // SAFETY: caller guarantees a live array box.
    let len = unsafe { (*boxed).value.len };
    GcArray::<T>::layout(len)
        .expect("array layout was computed at allocation time")
        .size()
}

/// Drops the initialised prefix and frees the block if an element
/// constructor unwinds mid-fill.
struct InitGuard<T> {
    data: *mut T,
    built: usize,
    block: *mut u8,
    layout: Layout,
}

impl<T> Drop for InitGuard<T> {
    fn drop(&mut self) {
        for i in (0..self.built).rev() {
            // SAFETY: exactly `built` elements were initialised.
            unsafe { ptr::drop_in_place(self.data.add(i)) };
        }
        // SAFETY: the block was allocated with this layout and never adopted.
        unsafe { alloc::dealloc(self.block, self.layout) };
    }
}

// ============================================================================
// Array allocation
// ============================================================================

impl GcContext {
    /// Allocate a managed array of `len` copies of `fill`, rooted by the
    /// returned handle.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] when the host allocator fails both
    /// before and after a rescue sweep, or when `len` overflows the layout.
    pub fn alloc_array<T>(&self, len: usize, fill: T) -> Result<Root<'_, GcArray<T>>, GcError>
    where
        T: Trace + Clone + 'static,
    {
        self.alloc_array_with(len, |_| fill.clone())
    }

    /// Allocate a managed array whose element at `i` is `init(i)`, rooted by
    /// the returned handle.
    ///
    /// If `init` panics, the elements constructed so far are dropped in
    /// reverse order, the block is freed, and the reserved root slot is
    /// released; the context stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] when the host allocator fails both
    /// before and after a rescue sweep, or when `len` overflows the layout.
    pub fn alloc_array_with<T, F>(
        &self,
        len: usize,
        mut init: F,
    ) -> Result<Root<'_, GcArray<T>>, GcError>
    where
        T: Trace + 'static,
        F: FnMut(usize) -> T,
    {
        let layout = GcArray::<T>::layout(len).map_err(|_| GcError::OutOfMemory)?;
        self.maybe_collect(layout.size());
        self.reserve_live_slot()?;
        let root: Root<'_, GcArray<T>> = Root::unattached(self)?;
        let block = self.alloc_block(layout)?;
        let boxed = block.cast::<GcBox<GcArray<T>>>().as_ptr();
        // SAFETY: `block` is a fresh allocation of `layout`; fields are
        // written before anything reads them.
        unsafe {
            ptr::addr_of_mut!((*boxed).header).write(GcHeader::new(
                trace_value::<GcArray<T>>,
                drop_array::<T>,
                size_array::<T>,
            ));
            ptr::addr_of_mut!((*boxed).value.len).write(len);
            let data = ptr::addr_of_mut!((*boxed).value.data).cast::<T>();
            let mut guard = InitGuard {
                data,
                built: 0,
                block: block.as_ptr(),
                layout,
            };
            for i in 0..len {
                data.add(i).write(init(i));
                guard.built += 1;
            }
            mem::forget(guard);
        }
        let erased = block.cast::<GcBox<()>>();
        self.adopt(erased);
        root.attach(erased);
        Ok(root)
    }
}
