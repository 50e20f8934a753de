//! Error types for resource and configuration failures in the search layer.
//!
//! Illegal-move or zero-king invariant violations are not represented here:
//! per the error-handling design, those are structurally unreachable from
//! the protocol surface and are caught with `debug_assert!` instead.

use thiserror::Error;

/// Resource failures encountered while preparing to search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The requested transposition table size could not be allocated; the
    /// engine fell back to `fallback_mb` and should report this, not abort.
    #[error("transposition table allocation failed for {requested_mb} MB, fell back to {fallback_mb} MB")]
    TranspositionTableFallback { requested_mb: usize, fallback_mb: usize },
}
