//! Cumulative totals over re-fetched windows
//!
//! Each poll re-reads a window that overlaps earlier polls. The totalizers
//! are pure functions of `(window, state[, now])` that add every measured
//! interval exactly once, so re-delivered points are harmless.

mod daily;
mod incremental;

pub use daily::{DailyOutcome, DailyTotalizer, DailyTotalizerState};
pub use incremental::{IncrementalOutcome, IncrementalTotalizer, TotalizerState};

/// A reading that may be added to a monotonic total.
///
/// Missing, non-finite and negative readings are treated as holes.
fn countable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}
