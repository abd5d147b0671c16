//! The dense registry of root slots.
//!
//! Each live [`Root`](crate::Root) handle owns one [`RootSlot`], a
//! heap-pinned cell holding the protected pointer and the slot's own index
//! into the dense array here. Registration and deregistration are O(1);
//! deregistration just nulls the dense entry, so holes accumulate when
//! handles die out of LIFO order. When the array fills up it is compacted
//! with a two-pointer sweep, and grown by a quarter if it is still more than
//! half occupied afterwards.

use std::cell::Cell;
use std::collections::TryReserveError;
use std::ptr::NonNull;

use crate::ptr::Erased;

/// The state shared between a root handle and the registry.
///
/// Lives in its own heap allocation so the handle can move freely while the
/// registry keeps a stable pointer to it; compaction rewrites `idx` through
/// that pointer.
pub(crate) struct RootSlot {
    /// This slot's position in the dense array.
    pub(crate) idx: Cell<usize>,
    /// The object this slot currently protects, if any.
    pub(crate) ptr: Cell<Option<Erased>>,
}

impl RootSlot {
    pub(crate) fn new() -> Self {
        Self {
            idx: Cell::new(usize::MAX),
            ptr: Cell::new(None),
        }
    }
}

pub(crate) struct RootSet {
    dense: Vec<Option<NonNull<RootSlot>>>,
}

impl RootSet {
    pub(crate) const fn new() -> Self {
        Self { dense: Vec::new() }
    }

    /// The cursor: one past the highest slot ever handed out since the last
    /// compaction.
    pub(crate) fn len(&self) -> usize {
        self.dense.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.dense.capacity()
    }

    pub(crate) fn at_capacity(&self) -> bool {
        self.dense.len() >= self.dense.capacity()
    }

    /// Number of occupied slots (live root handles).
    pub(crate) fn live_count(&self) -> usize {
        self.dense.iter().filter(|entry| entry.is_some()).count()
    }

    /// Place a slot at the cursor and record its index in it. The caller has
    /// ensured capacity via `compact`/`try_grow`.
    pub(crate) fn push(&mut self, slot: NonNull<RootSlot>) {
        debug_assert!(self.dense.len() < self.dense.capacity());
        let idx = self.dense.len();
        // SAFETY: slots stay pinned on the heap while registered.
        unsafe { slot.as_ref() }.idx.set(idx);
        self.dense.push(Some(slot));
    }

    /// Null a slot's dense entry. The cursor is untouched; the hole is
    /// reclaimed by the next compaction.
    pub(crate) fn clear_slot(&mut self, index: usize) {
        self.dense[index] = None;
    }

    /// Two-pointer compaction: walk holes from the front, live slots from
    /// the back, and move the latter into the former, updating each moved
    /// slot's recorded index. Afterwards `dense[0..len)` is hole-free.
    pub(crate) fn compact(&mut self) {
        if self.dense.is_empty() {
            return;
        }
        let mut oi = 0;
        let mut end = self.dense.len() - 1;
        while oi < end {
            if self.dense[oi].is_some() {
                oi += 1;
            } else if self.dense[end].is_none() {
                end -= 1;
            } else if let Some(slot) = self.dense[end].take() {
                // SAFETY: slots stay pinned on the heap while registered.
                unsafe { slot.as_ref() }.idx.set(oi);
                self.dense[oi] = Some(slot);
                end -= 1;
                oi += 1;
            }
        }
        let live_end = if self.dense[end].is_some() {
            end + 1
        } else {
            end
        };
        self.dense.truncate(live_end);
    }

    /// After compaction: the target capacity to grow to if the array is
    /// still at least half occupied, or `None` if there is room to spare.
    pub(crate) fn grow_target(&self, initial: usize) -> Option<usize> {
        let cap = self.dense.capacity();
        if self.dense.len() * 2 >= cap {
            Some(if cap == 0 { initial.max(1) } else { cap + cap / 4 })
        } else {
            None
        }
    }

    /// Grow to at least `target` slots. The caller owns the
    /// rescue-sweep-and-retry policy.
    pub(crate) fn try_grow(&mut self, target: usize) -> Result<(), TryReserveError> {
        let additional = target.saturating_sub(self.dense.len());
        self.dense.try_reserve_exact(additional)
    }

    /// Every occupied slot, in dense order.
    pub(crate) fn iter_live(&self) -> impl Iterator<Item = &RootSlot> + '_ {
        self.dense.iter().filter_map(|entry| {
            // SAFETY: registered slots stay pinned until deregistered.
            entry.map(|slot| unsafe { &*slot.as_ptr() })
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn slots(&self) -> &[Option<NonNull<RootSlot>>] {
        &self.dense
    }

    /// Forget every registered slot. Teardown-only: the handles that own the
    /// slot allocations have been leaked by the caller's own admission.
    pub(crate) fn clear(&mut self) {
        self.dense.clear();
    }
}
