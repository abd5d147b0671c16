//! The collector context: allocation, collection, marking, teardown.
//!
//! A [`GcContext`] owns one logical heap. It tracks every managed object in
//! the two-sided dense live registry, every root handle in the dense root
//! registry, and decides when to collect from a byte-threshold heuristic.
//! Everything is single-threaded and synchronous: `collect` runs to
//! completion inside the caller, and the context is `!Send`/`!Sync`.

use std::alloc::Layout;
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::time::Instant;

use crate::error::GcError;
use crate::live_set::LiveSet;
use crate::metrics::GcMetrics;
use crate::ptr::{Erased, GcBox, GcHeader};
use crate::roots::{RootSet, RootSlot};
use crate::trace::{Marker, Trace};
use crate::Root;

/// Fallback collection threshold when a sweep leaves the heap empty.
const DEFAULT_COLLECT_THRESHOLD: usize = 64 * 1024;

/// Tuning knobs for a [`GcContext`].
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// First growth target for the dense live arrays.
    pub initial_live_capacity: usize,
    /// First growth target for the dense root array.
    pub initial_root_capacity: usize,
    /// Allocated-byte threshold that triggers the first collection.
    pub initial_threshold: usize,
    /// Emit a diagnostic event per collection (requires the `tracing`
    /// feature; the sink is whatever subscriber the host installed).
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_live_capacity: 1024,
            initial_root_capacity: 256,
            initial_threshold: DEFAULT_COLLECT_THRESHOLD,
            verbose: false,
        }
    }
}

/// A per-thread mark-sweep collector.
///
/// The context is the explicit owner of everything it allocates: objects are
/// created with [`alloc`](GcContext::alloc) (or the array variants), kept
/// alive by [`Root`] handles and the references reported through
/// [`Trace`], and destroyed during the sweep phase of a collection once
/// unreachable. Dropping the context destroys every remaining object.
///
/// Collections run either on demand ([`collect`](GcContext::collect)) or
/// when an allocation pushes the accounted heap size past the current
/// threshold. Failed host allocations always trigger exactly one
/// rescue-sweep-then-retry before [`GcError::OutOfMemory`] is reported.
pub struct GcContext {
    config: GcConfig,
    live: UnsafeCell<LiveSet>,
    roots: UnsafeCell<RootSet>,
    /// Sum of retained sizes over the current live side.
    alloc_bytes: Cell<usize>,
    /// Allocating past this many bytes triggers a collection.
    threshold: Cell<usize>,
    /// Re-entrancy guard: a `collect` issued while collecting is a no-op.
    collecting: Cell<bool>,
    collections: Cell<usize>,
    last_metrics: Cell<GcMetrics>,
    #[cfg(any(test, feature = "test-util"))]
    fail_allocs: Cell<usize>,
    /// A context is pinned to the thread that created it.
    _not_send: PhantomData<*const ()>,
}

impl GcContext {
    /// Create a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a context with explicit tuning knobs.
    #[must_use]
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            threshold: Cell::new(config.initial_threshold),
            live: UnsafeCell::new(LiveSet::new()),
            roots: UnsafeCell::new(RootSet::new()),
            alloc_bytes: Cell::new(0),
            collecting: Cell::new(false),
            collections: Cell::new(0),
            last_metrics: Cell::new(GcMetrics::new()),
            #[cfg(any(test, feature = "test-util"))]
            fail_allocs: Cell::new(0),
            config,
            _not_send: PhantomData,
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Heap-allocate `value` under collector management and return a fresh
    /// root handle protecting it.
    ///
    /// May run a collection first when the accounted heap size is past the
    /// threshold. By the time this returns, the object is live, registered
    /// and rooted.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::OutOfMemory`] when the host allocator fails both
    /// before and after a rescue sweep, for the object itself or for
    /// bookkeeping growth. On error nothing is registered: previously
    /// allocated objects are unaffected.
    pub fn alloc<T: Trace + 'static>(&self, value: T) -> Result<Root<'_, T>, GcError> {
        let layout = Layout::new::<GcBox<T>>();
        self.maybe_collect(layout.size());
        self.reserve_live_slot()?;
        let root: Root<'_, T> = Root::unattached(self)?;
        let block = self.alloc_block(layout)?;
        let boxed = block.cast::<GcBox<T>>().as_ptr();
        // SAFETY: `block` is a fresh allocation of `layout`; fields are
        // written before anything reads them.
        unsafe {
            std::ptr::addr_of_mut!((*boxed).header).write(GcHeader::for_value::<T>());
            std::ptr::addr_of_mut!((*boxed).value).write(value);
        }
        let erased = block.cast::<GcBox<()>>();
        self.adopt(erased);
        root.attach(erased);
        Ok(root)
    }

    /// Collection trigger on the allocation fast path. `estimate` is a
    /// static approximation; the authoritative size is taken from the
    /// object's vtable after construction.
    pub(crate) fn maybe_collect(&self, estimate: usize) {
        if self.alloc_bytes.get() + estimate > self.threshold.get() {
            self.collect();
        }
    }

    /// Make sure the dense live arrays can take one more object, growing
    /// them with the rescue-sweep-then-retry-once policy.
    pub(crate) fn reserve_live_slot(&self) -> Result<(), GcError> {
        // SAFETY: tight scope, no overlapping access.
        let (needs, target) = {
            let live = unsafe { &*self.live.get() };
            (
                live.needs_room(),
                live.grow_target(self.config.initial_live_capacity),
            )
        };
        if !needs {
            return Ok(());
        }
        // SAFETY: exclusive within this statement.
        if unsafe { &mut *self.live.get() }.try_grow(target).is_ok() {
            return Ok(());
        }
        self.collect();
        // SAFETY: exclusive within this statement.
        unsafe { &mut *self.live.get() }
            .try_grow(target)
            .map_err(|_| GcError::OutOfMemory)
    }

    /// Allocate a raw block, rescuing with one sweep on failure.
    pub(crate) fn alloc_block(&self, layout: Layout) -> Result<NonNull<u8>, GcError> {
        if let Some(block) = self.try_raw_alloc(layout) {
            return Ok(block);
        }
        self.collect();
        self.try_raw_alloc(layout).ok_or(GcError::OutOfMemory)
    }

    fn try_raw_alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        #[cfg(any(test, feature = "test-util"))]
        {
            let pending = self.fail_allocs.get();
            if pending > 0 {
                self.fail_allocs.set(pending - 1);
                return None;
            }
        }
        debug_assert!(layout.size() > 0);
        // SAFETY: layout is non-zero-sized (every block starts with a header).
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    /// Account a freshly constructed object and record it in the current
    /// live side, stamping its header.
    pub(crate) fn adopt(&self, obj: Erased) {
        // SAFETY: obj is a fully initialised allocation of this context.
        let size = unsafe { ((*obj.as_ptr()).header.size_fn)(obj.as_ptr().cast()) };
        self.alloc_bytes.set(self.alloc_bytes.get() + size);
        // SAFETY: exclusive within this scope.
        let live = unsafe { &mut *self.live.get() };
        let index = live.insert(obj);
        // SAFETY: header access does not alias the dense arrays.
        unsafe { &(*obj.as_ptr()).header }.set_location(live.cur_index(), index);
    }

    // ========================================================================
    // Root registry plumbing
    // ========================================================================

    /// Claim the next dense root slot for `slot`, compacting and growing the
    /// registry as needed (growth uses the rescue-sweep-then-retry policy).
    pub(crate) fn register_root(&self, slot: NonNull<RootSlot>) -> Result<(), GcError> {
        // SAFETY: tight scope, no overlapping access.
        let full = unsafe { &*self.roots.get() }.at_capacity();
        if full {
            // SAFETY: exclusive within this statement; compaction only
            // touches the registry and the pinned slots.
            let target = {
                let roots = unsafe { &mut *self.roots.get() };
                roots.compact();
                roots.grow_target(self.config.initial_root_capacity)
            };
            if let Some(target) = target {
                // SAFETY: exclusive within this statement.
                let grown = unsafe { &mut *self.roots.get() }.try_grow(target).is_ok();
                if !grown {
                    self.collect();
                    // SAFETY: exclusive within this statement.
                    unsafe { &mut *self.roots.get() }
                        .try_grow(target)
                        .map_err(|_| GcError::OutOfMemory)?;
                }
            }
        }
        // SAFETY: exclusive within this statement.
        unsafe { &mut *self.roots.get() }.push(slot);
        Ok(())
    }

    pub(crate) fn unregister_root(&self, index: usize) {
        // SAFETY: exclusive within this statement.
        unsafe { &mut *self.roots.get() }.clear_slot(index);
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full mark-sweep collection now.
    ///
    /// Every object reachable from a live root when this is called is still
    /// alive when it returns; everything else is destroyed, exactly once. A
    /// re-entrant call (possible only from code the collector itself runs)
    /// is a silent no-op.
    pub fn collect(&self) {
        if self.collecting.get() {
            return;
        }
        self.collecting.set(true);

        let started = Instant::now();
        let before_bytes = self.alloc_bytes.get();
        self.alloc_bytes.set(0);

        // Flip: the whole population is presumed trash until marked back.
        // SAFETY: exclusive within this statement.
        unsafe { &mut *self.live.get() }.flip();

        // Mark everything the roots protect.
        {
            // SAFETY: marking mutates the live registry, never the roots.
            let roots = unsafe { &*self.roots.get() };
            for slot in roots.iter_live() {
                if let Some(obj) = slot.ptr.get() {
                    self.mark_erased(obj);
                }
            }
        }

        // Transitive marking. Survivors are appended to the side being
        // walked, so the length is re-read on every step; the walk ends when
        // the cursor catches up with the grown array.
        let mut cursor = 0;
        loop {
            let entry = {
                // SAFETY: tight scope, released before trace runs.
                let live = unsafe { &*self.live.get() };
                let current = live.current();
                if cursor >= current.len() {
                    break;
                }
                current[cursor]
            };
            if let Some(obj) = entry {
                // SAFETY: obj is live; trace may re-enter mark_erased, which
                // takes its own disjoint access to the registries.
                let trace_fn = unsafe { (*obj.as_ptr()).header.trace_fn };
                let mut marker = Marker::new(self);
                // SAFETY: obj points at the matching GcBox type for its vtable.
                unsafe { trace_fn(obj.as_ptr().cast(), &mut marker) };
            }
            cursor += 1;
        }

        // Sweep whatever was not rescued.
        let mut swept = 0usize;
        // SAFETY: user drops run inside, but they cannot reach the context.
        unsafe { &mut *self.live.get() }.drain_trash(|obj| {
            swept += 1;
            // SAFETY: obj was unreachable; destroyed exactly once here.
            unsafe {
                let drop_fn = (*obj.as_ptr()).header.drop_fn;
                drop_fn(obj.as_ptr().cast());
            }
        });

        // Re-threshold: twice the surviving bytes, decaying rather than
        // snapping downwards to avoid rapid re-collection.
        let surviving_bytes = self.alloc_bytes.get();
        let mut new_max = surviving_bytes.saturating_mul(2);
        if new_max == 0 {
            new_max = DEFAULT_COLLECT_THRESHOLD;
        }
        let current = self.threshold.get();
        self.threshold.set(if current > new_max {
            (current + new_max) / 2
        } else {
            new_max
        });

        self.collections.set(self.collections.get() + 1);
        let metrics = GcMetrics {
            duration: started.elapsed(),
            bytes_reclaimed: before_bytes.saturating_sub(surviving_bytes),
            bytes_surviving: surviving_bytes,
            objects_reclaimed: swept,
            // SAFETY: tight scope, no overlapping access.
            objects_surviving: unsafe { &*self.live.get() }.current().len(),
            total_collections: self.collections.get(),
        };
        self.last_metrics.set(metrics);

        #[cfg(feature = "tracing")]
        if self.config.verbose {
            tracing::debug!(
                bytes_before = before_bytes,
                bytes_after = surviving_bytes,
                objects_after = metrics.objects_surviving,
                reclaimed_objects = metrics.objects_reclaimed,
                duration_us = u64::try_from(metrics.duration.as_micros()).unwrap_or(u64::MAX),
                "collection"
            );
        }

        self.collecting.set(false);
    }

    /// Move one object from the trash side to the live side.
    ///
    /// Called from root scanning and from `trace` implementations via
    /// [`Marker::mark`]. Objects already in the live side are left alone, so
    /// reporting the same reference twice is harmless.
    pub(crate) fn mark_erased(&self, obj: Erased) {
        if !self.collecting.get() {
            return;
        }
        // SAFETY: the header does not alias the dense arrays.
        let header = unsafe { &(*obj.as_ptr()).header };
        // SAFETY: tight scope, no overlapping access.
        let cur = unsafe { &*self.live.get() }.cur_index();
        if header.color() == cur {
            return;
        }
        {
            // SAFETY: exclusive within this scope.
            let live = unsafe { &mut *self.live.get() };
            let evicted = live.clear_trash_slot(header.index());
            debug_assert_eq!(evicted, Some(obj), "header disagrees with its dense slot");
            let index = live.insert(obj);
            header.set_location(cur, index);
        }
        // SAFETY: obj is a fully initialised allocation of this context.
        let size = unsafe { (header.size_fn)(obj.as_ptr().cast()) };
        self.alloc_bytes.set(self.alloc_bytes.get() + size);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Bytes currently accounted against the collection threshold: the sum
    /// of retained sizes over all live objects.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.alloc_bytes.get()
    }

    /// Number of live managed objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        // SAFETY: tight scope, no overlapping access.
        unsafe { &*self.live.get() }.current().len()
    }

    /// Number of live root handles.
    #[must_use]
    pub fn live_roots(&self) -> usize {
        // SAFETY: tight scope, no overlapping access.
        unsafe { &*self.roots.get() }.live_count()
    }

    /// Collections performed by this context so far.
    #[must_use]
    pub fn collections(&self) -> usize {
        self.collections.get()
    }

    /// The allocated-byte threshold that will trigger the next collection.
    #[must_use]
    pub fn collect_threshold(&self) -> usize {
        self.threshold.get()
    }

    /// Statistics from the most recent collection.
    #[must_use]
    pub fn last_metrics(&self) -> GcMetrics {
        self.last_metrics.get()
    }

    // ========================================================================
    // Test instrumentation
    // ========================================================================

    /// Make the next `n` block allocations fail, as if the host allocator
    /// had returned null.
    #[cfg(any(test, feature = "test-util"))]
    #[doc(hidden)]
    pub fn fail_next_allocs(&self, n: usize) {
        self.fail_allocs.set(n);
    }

    /// Check every structural invariant that holds outside a collection.
    ///
    /// # Panics
    ///
    /// Panics if any invariant is violated: header/slot agreement, an empty
    /// trash side, root index agreement, or a retained-size sum that
    /// disagrees with the byte accounting.
    #[cfg(any(test, feature = "test-util"))]
    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        assert!(!self.collecting.get());
        // SAFETY: no collection in progress, no overlapping access.
        let live = unsafe { &*self.live.get() };
        let cur = live.cur_index();
        let mut size_sum = 0usize;
        for (i, entry) in live.current().iter().enumerate() {
            let obj = entry.expect("live side must be dense");
            // SAFETY: live objects are valid allocations of this context.
            let header = unsafe { &(*obj.as_ptr()).header };
            assert_eq!(header.color(), cur, "live object carries a stale color");
            assert_eq!(header.index(), i, "live object disagrees with its slot");
            // SAFETY: as above.
            size_sum += unsafe { (header.size_fn)(obj.as_ptr().cast()) };
        }
        assert!(
            live.trash().is_empty(),
            "trash side must be empty outside a collection"
        );
        assert_eq!(
            size_sum,
            self.alloc_bytes.get(),
            "retained sizes disagree with the byte accounting"
        );
        // SAFETY: no overlapping access.
        let roots = unsafe { &*self.roots.get() };
        for (i, entry) in roots.slots().iter().enumerate() {
            if let Some(slot) = entry {
                // SAFETY: registered slots are pinned.
                assert_eq!(
                    unsafe { slot.as_ref() }.idx.get(),
                    i,
                    "root slot disagrees with its index"
                );
            }
        }
    }
}

impl Default for GcContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GcContext {
    /// Teardown: report root slots that were leaked past the context (only
    /// possible via `mem::forget`), then destroy every remaining object with
    /// one final collection.
    fn drop(&mut self) {
        let stray = self.roots.get_mut().live_count();
        if stray != 0 {
            let err = GcError::RootsOutlivingContext { live_roots: stray };
            #[cfg(feature = "tracing")]
            tracing::error!(live_roots = stray, "{err}");
            #[cfg(not(feature = "tracing"))]
            eprintln!("sparsegc: {err}");
            self.roots.get_mut().clear();
        }
        // With no roots left, this moves everything to the trash and
        // destroys it.
        self.collect();
    }
}
