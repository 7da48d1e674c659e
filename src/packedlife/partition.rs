//! Static work partitioning across worker slots.
//!
//! Each worker pays a flush cost proportional to its range once its sweep
//! ends. Ranges therefore grow geometrically by `1 + flush_fraction`, so
//! workers that start flushing earlier have less to compute and all of them
//! finish at roughly the same time.

use std::ops::Range;

pub const DEFAULT_FLUSH_FRACTION: f64 = 0.05;

/// Split `[0, total)` into `tasks` contiguous ranges.
///
/// Every range but the last takes `ceil(b_i)` words (or whatever remains),
/// with `b_1 = total * f / ((1 + f)^tasks - 1)` and `b_i = b_{i-1} * (1 + f)`.
/// The last range absorbs the remainder. `tasks` must be at least 1.
pub fn plan(total: usize, tasks: usize, flush_fraction: f64) -> Vec<Range<usize>> {
    debug_assert!(tasks >= 1);
    debug_assert!(flush_fraction.is_finite() && flush_fraction >= 0.0);

    let growth = 1.0 + flush_fraction;
    let mut block = if flush_fraction > 0.0 {
        total as f64 * flush_fraction / (growth.powi(tasks as i32) - 1.0)
    } else {
        total as f64 / tasks as f64
    };

    let mut ranges = Vec::with_capacity(tasks);
    let mut start = 0usize;
    for _ in 0..tasks.saturating_sub(1) {
        let len = (block.ceil() as usize).min(total - start);
        ranges.push(start..start + len);
        start += len;
        block *= growth;
    }
    ranges.push(start..total);
    ranges
}
