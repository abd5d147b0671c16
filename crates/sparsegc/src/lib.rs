//! A per-thread, non-moving, mark-sweep garbage collector.
//!
//! `sparsegc` manages a user-defined graph of heap objects whose references
//! may be arbitrarily cyclic. Application code allocates through an explicit
//! [`GcContext`], holds a small number of [`Root`] handles on the stack or in
//! long-lived storage, and lets the collector reclaim whatever is no longer
//! reachable from those roots.
//!
//! Membership bookkeeping uses **Briggs–Torczon sparse sets** throughout
//! (see <https://research.swtch.com/sparse>): each object carries one header
//! word (a color bit plus a dense index), and the two dense object arrays
//! double as the mark-phase worklist and the sweep-phase free list. The root
//! registry is the same structure turned outward, with each root handle
//! holding its own index.
//!
//! # Features
//!
//! - **Cycle collection**: unlike reference counting, mark-sweep reclaims
//!   cyclic graphs naturally
//! - **Non-moving**: object addresses are stable for their whole lifetime
//! - **Explicit context**: no globals, no thread-locals; one collector per
//!   logical heap, pinned to its thread
//! - **Deterministic roots**: handles release their registry slot at end of
//!   scope, on every exit path
//!
//! # Quick start
//!
//! ```
//! use sparsegc::{GcContext, GcRef, Trace};
//! use std::cell::Cell;
//!
//! #[derive(Trace)]
//! struct Node {
//!     value: i32,
//!     next: Cell<Option<GcRef<Node>>>,
//! }
//!
//! let gc = GcContext::new();
//! let a = gc.alloc(Node { value: 1, next: Cell::new(None) })?;
//! let b = gc.alloc(Node { value: 2, next: Cell::new(None) })?;
//!
//! // Link the nodes into a cycle.
//! a.next.set(Some(b.as_gc()));
//! b.next.set(Some(a.as_gc()));
//!
//! // `a`'s root keeps the whole cycle reachable.
//! drop(b);
//! gc.collect();
//! assert_eq!(a.next.get().unwrap().value, 2);
//!
//! // Once the last root is gone, the cycle is reclaimed.
//! drop(a);
//! gc.collect();
//! assert_eq!(gc.live_objects(), 0);
//! # Ok::<(), sparsegc::GcError>(())
//! ```
//!
//! # Managed arrays
//!
//! The one container the collector ships itself is [`GcArray`], a
//! fixed-length sequence allocated in a single block. Arrays of plain values
//! trace as a no-op; arrays of managed references mark every element. The
//! choice is made from the element type at construction, never from runtime
//! content:
//!
//! ```
//! use sparsegc::{GcContext, GcRef};
//! use std::cell::Cell;
//!
//! let gc = GcContext::new();
//! let values = gc.alloc_array(3, 0u64)?;
//! assert_eq!(values.len(), 3);
//!
//! let slots = gc.alloc_array(2, Cell::new(None::<GcRef<u64>>))?;
//! let answer = gc.alloc(42u64)?;
//! slots[0].set(Some(answer.as_gc()));
//! drop(answer); // still reachable through the rooted array
//! gc.collect();
//! assert_eq!(*slots[0].get().unwrap(), 42);
//! # Ok::<(), sparsegc::GcError>(())
//! ```
//!
//! # Thread safety
//!
//! A [`GcContext`] and everything it owns is pinned to one thread; the
//! context, [`Root`] and [`GcRef`] are all `!Send` and `!Sync`. There are no
//! locks and no suspension points: a collection is a synchronous
//! stop-the-world step on the owning thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod array;
mod context;
mod error;
mod live_set;
mod metrics;
mod ptr;
mod roots;
mod trace;

pub use array::GcArray;
pub use context::{GcConfig, GcContext};
pub use error::GcError;
pub use metrics::GcMetrics;
pub use ptr::{GcRef, Root};
pub use trace::{Marker, Trace};

// Re-export the derive macro when the feature is enabled.
#[cfg(feature = "derive")]
pub use sparsegc_derive::Trace;
