//! First/last column repair for layouts without embedded wraparound bits.
//!
//! When a row's last word has fewer than two spare bits, the bulk sweep sees
//! the wrong horizontal neighbours for column 0 and column `width - 1`. Those
//! two cells are recomputed here from a direct toroidal lookup.

use std::ops::Range;

use super::grid::{GridLayout, WORD_BITS, WordBuffer};
use super::kernel::{SweepOutcome, next_cell_state};
use super::task::CancelToken;

#[inline]
fn cell(buf: &WordBuffer, layout: &GridLayout, x: i64, y: i64) -> u32 {
    let index = layout.torus().to_index(x, y);
    let (offset, shift) = layout.locate(index);
    (buf.load(offset) >> shift) & 1
}

/// Next state of `(x, y)` from the eight wrapped neighbours in `buf`.
pub fn next_state_at(buf: &WordBuffer, layout: &GridLayout, x: usize, y: usize) -> bool {
    let (x, y) = (x as i64, y as i64);
    let mut neighbours = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx != 0 || dy != 0 {
                neighbours += cell(buf, layout, x + dx, y + dy);
            }
        }
    }
    next_cell_state(cell(buf, layout, x, y) != 0, neighbours)
}

#[inline]
fn store_bit(buf: &WordBuffer, offset: usize, shift: u32, alive: bool) {
    let word = buf.load(offset);
    buf.store(offset, (word & !(1 << shift)) | ((alive as u32) << shift));
}

/// Overwrite column 0 and column `width - 1` in `next` for every row whose
/// first or last word lies inside `range`.
///
/// No-op for layouts with embedded wraparound bits.
pub fn repair_edges(
    layout: &GridLayout,
    current: &WordBuffer,
    next: &WordBuffer,
    range: Range<usize>,
    cancel: &CancelToken,
) -> SweepOutcome {
    if layout.edge_cells_optimization() || range.is_empty() {
        return SweepOutcome::Completed;
    }

    let rw = layout.row_words();
    let last_x = layout.width() - 1;
    let last_shift = (last_x % WORD_BITS) as u32;

    for row in range.start / rw..=(range.end - 1) / rw {
        if cancel.is_cancelled() {
            return SweepOutcome::Cancelled;
        }

        let first = row * rw;
        if range.contains(&first) {
            let alive = next_state_at(current, layout, 0, row);
            store_bit(next, layout.offset(first), 0, alive);
        }

        let last = first + rw - 1;
        if range.contains(&last) {
            let alive = next_state_at(current, layout, last_x, row);
            store_bit(next, layout.offset(last), last_shift, alive);
        }
    }

    SweepOutcome::Completed
}
