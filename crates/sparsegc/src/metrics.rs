//! Per-collection statistics.

use std::time::Duration;

/// Statistics from the most recent collection of a [`GcContext`].
///
/// Retrieved with [`GcContext::last_metrics`]. All counters describe a single
/// collection except `total_collections`, which is cumulative for the
/// context's lifetime.
///
/// [`GcContext`]: crate::GcContext
/// [`GcContext::last_metrics`]: crate::GcContext::last_metrics
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the collection.
    pub duration: Duration,
    /// Bytes accounted to objects destroyed by the sweep.
    pub bytes_reclaimed: usize,
    /// Bytes accounted to objects that survived.
    pub bytes_surviving: usize,
    /// Number of objects destroyed by the sweep.
    pub objects_reclaimed: usize,
    /// Number of objects that survived.
    pub objects_surviving: usize,
    /// Collections performed by this context so far, including this one.
    pub total_collections: usize,
}

impl GcMetrics {
    /// Create a `GcMetrics` with all fields set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
