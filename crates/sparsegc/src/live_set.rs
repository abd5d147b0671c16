//! The two-sided dense registry of live objects.
//!
//! Membership bookkeeping in the Briggs-Torczon sparse-set style: the sparse
//! part is the `(color, index)` word in each object's header, the dense part
//! is a pair of arrays of object pointers. Outside a collection every live
//! object sits in the current side and the other side is empty. A collection
//! flips the current side in O(1), turning the entire population into
//! presumed trash; marking moves survivors back one by one, and whatever is
//! left on the old side at the end is swept.
//!
//! The current side also doubles as the mark-phase worklist: survivors are
//! appended while the array is being walked, so the walk naturally visits
//! everything that becomes reachable.

use std::collections::TryReserveError;

use crate::ptr::Erased;

pub(crate) struct LiveSet {
    sets: [Vec<Option<Erased>>; 2],
    cur: usize,
}

impl LiveSet {
    pub(crate) const fn new() -> Self {
        Self {
            sets: [Vec::new(), Vec::new()],
            cur: 0,
        }
    }

    /// The color stamped into headers of objects inserted now.
    pub(crate) fn cur_index(&self) -> usize {
        self.cur
    }

    pub(crate) fn current(&self) -> &[Option<Erased>] {
        &self.sets[self.cur]
    }

    pub(crate) fn trash(&self) -> &[Option<Erased>] {
        &self.sets[1 - self.cur]
    }

    /// Both sides are grown in lockstep; the effective capacity is the
    /// smaller of the two (they only diverge after a partial growth failure).
    fn capacity(&self) -> usize {
        self.sets[0].capacity().min(self.sets[1].capacity())
    }

    /// Whether one more insertion would overrun the dense arrays.
    pub(crate) fn needs_room(&self) -> bool {
        self.sets[self.cur].len() + 1 >= self.capacity()
    }

    pub(crate) fn grow_target(&self, initial: usize) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            initial.max(1)
        } else {
            cap + cap / 2
        }
    }

    /// Grow both sides to at least `target` slots. The caller owns the
    /// rescue-sweep-and-retry policy; this only reports the failure.
    pub(crate) fn try_grow(&mut self, target: usize) -> Result<(), TryReserveError> {
        for side in &mut self.sets {
            let additional = target.saturating_sub(side.len());
            side.try_reserve_exact(additional)?;
        }
        Ok(())
    }

    /// Append to the current side and return the slot index. The caller
    /// stamps the header and has already ensured capacity, so this never
    /// reallocates (which matters mid-mark: the walk holds raw indices).
    pub(crate) fn insert(&mut self, obj: Erased) -> usize {
        let side = &mut self.sets[self.cur];
        debug_assert!(side.len() < side.capacity());
        side.push(Some(obj));
        side.len() - 1
    }

    /// Swap the roles of the two sides. The incoming current side must be
    /// empty, i.e. the previous sweep ran to completion.
    pub(crate) fn flip(&mut self) {
        debug_assert!(self.sets[1 - self.cur].is_empty());
        self.cur = 1 - self.cur;
    }

    /// Null a survivor's old slot while marking moves it across.
    pub(crate) fn clear_trash_slot(&mut self, index: usize) -> Option<Erased> {
        self.sets[1 - self.cur][index].take()
    }

    /// Invoke `f` on every object still recorded in the trash side, then
    /// reset it to empty.
    pub(crate) fn drain_trash(&mut self, mut f: impl FnMut(Erased)) {
        let trash = 1 - self.cur;
        for entry in &mut self.sets[trash] {
            if let Some(obj) = entry.take() {
                f(obj);
            }
        }
        self.sets[trash].clear();
    }
}
