//! Error types reported by the collector.

use std::error::Error;
use std::fmt;

/// Errors surfaced by collector operations.
///
/// The collector never continues in a partially-corrupted state: an
/// allocation that fails even after the rescue sweep is reported here and
/// leaves every previously allocated object intact and correctly tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// The host allocator failed both before and after a rescue sweep.
    OutOfMemory,
    /// Context teardown found root slots that were never released.
    ///
    /// Safe code cannot produce this: root handles borrow their context.
    /// It is observable only when a handle is leaked with [`std::mem::forget`],
    /// in which case teardown reports the count and proceeds best-effort.
    RootsOutlivingContext {
        /// Number of root slots still occupied at teardown.
        live_roots: usize,
    },
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("allocation failed even after a rescue sweep"),
            Self::RootsOutlivingContext { live_roots } => {
                write!(f, "{live_roots} root handle(s) outlived the collector context")
            }
        }
    }
}

impl Error for GcError {}
