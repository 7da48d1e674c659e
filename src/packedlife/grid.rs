//! Packed double-buffered grid storage for PackedLife.
//!
//! Cells are packed 32 per `u32` word, rows padded up to whole words. Each
//! buffer carries `row_words + 1` padding words before and after the grid:
//! - row -1 mirrors the last row, row `height` mirrors the first row
//! - one extra word before row -1 and after row `height` keeps the kernel's
//!   windowed reads (previous word, row above, row below) in bounds
//!
//! Words are `AtomicU32` accessed with relaxed ordering. Workers only read
//! `current` and write disjoint ranges of `next`; the engine thread may edit
//! `current` mid-generation. Happens-before between generations comes from
//! the task completion channel, not from these loads and stores.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{GridError, Result};
use super::torus::Torus;

/// Cells per packed word.
pub const WORD_BITS: usize = 32;

/// One packed buffer (grid plus padding).
pub struct WordBuffer {
    words: Box<[AtomicU32]>,
}

impl WordBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline(always)]
    pub fn load(&self, offset: usize) -> u32 {
        self.words[offset].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn store(&self, offset: usize, value: u32) {
        self.words[offset].store(value, Ordering::Relaxed);
    }

    pub fn fill(&self, value: u32) {
        for word in self.words.iter() {
            word.store(value, Ordering::Relaxed);
        }
    }

    /// Copy `count` words from `src` to `dst`. Ranges must not overlap.
    pub fn copy_words(&self, src: usize, dst: usize, count: usize) {
        debug_assert!(src + count <= dst || dst + count <= src);
        for k in 0..count {
            self.store(dst + k, self.load(src + k));
        }
    }

    /// Snapshot a range of absolute offsets.
    pub fn snapshot(&self, range: Range<usize>) -> Vec<u32> {
        range.map(|offset| self.load(offset)).collect()
    }
}

/// Geometry shared by both buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    torus: Torus,
    row_words: usize,
    padding: usize,
    grid_words: usize,
    edge_cells_optimization: bool,
}

impl GridLayout {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GridError::InvalidDimensions { width, height });
        }
        let row_words = width.div_ceil(WORD_BITS);
        let grid_words = row_words
            .checked_mul(height)
            .filter(|&words| words <= u32::MAX as usize - 2 * (row_words + 1))
            .ok_or(GridError::GridTooLarge { width, height })?;
        let spare_bits = row_words * WORD_BITS - width;

        Ok(Self {
            torus: Torus::new(width, height),
            row_words,
            padding: row_words + 1,
            grid_words,
            edge_cells_optimization: spare_bits >= 2,
        })
    }

    #[inline]
    pub fn torus(&self) -> Torus {
        self.torus
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.torus.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.torus.height()
    }

    #[inline]
    pub fn row_words(&self) -> usize {
        self.row_words
    }

    /// Words before (and after) the real grid.
    #[inline]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[inline]
    pub fn grid_words(&self) -> usize {
        self.grid_words
    }

    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.grid_words + 2 * self.padding
    }

    /// Unused bits at the top of each row's last word.
    #[inline]
    pub fn spare_bits(&self) -> usize {
        self.row_words * WORD_BITS - self.width()
    }

    /// Whether column wraparound is embedded in the spare bits of each row.
    #[inline]
    pub fn edge_cells_optimization(&self) -> bool {
        self.edge_cells_optimization
    }

    /// Absolute buffer offset of a batch index.
    #[inline(always)]
    pub fn offset(&self, batch: usize) -> usize {
        self.padding + batch
    }

    /// Batch index of the word holding a canonical cell index.
    #[inline]
    pub fn batch_of(&self, index: usize) -> usize {
        let (x, y) = (index % self.width(), index / self.width());
        y * self.row_words + x / WORD_BITS
    }

    /// (absolute offset, bit shift) of a canonical cell index.
    #[inline]
    pub fn locate(&self, index: usize) -> (usize, u32) {
        debug_assert!(index < self.torus.cell_count());
        let (x, y) = (index % self.width(), index / self.width());
        let offset = self.offset(y * self.row_words + x / WORD_BITS);
        (offset, (x % WORD_BITS) as u32)
    }

    #[inline]
    pub fn is_first_word(&self, batch: usize) -> bool {
        batch % self.row_words == 0
    }

    #[inline]
    pub fn is_last_word(&self, batch: usize) -> bool {
        batch % self.row_words == self.row_words - 1
    }

    /// Mask of real cells in a row's last word.
    #[inline]
    pub fn last_word_mask(&self) -> u32 {
        match self.width() % WORD_BITS {
            0 => u32::MAX,
            bits => u32::MAX >> (WORD_BITS - bits),
        }
    }

    /// Clear spare bits in words copied out of a buffer, where `words[i]`
    /// is batch `start_batch + i`.
    pub fn mask_spare_bits(&self, start_batch: usize, words: &mut [u32]) {
        let mask = self.last_word_mask();
        if mask == u32::MAX {
            return;
        }
        for (batch, word) in (start_batch..).zip(words.iter_mut()) {
            if self.is_last_word(batch) {
                *word &= mask;
            }
        }
    }
}

/// Rebuild the wraparound padding of one buffer.
///
/// Idempotent: only padding rows and spare bits are written, and their new
/// values depend solely on real cells.
pub fn fix_padding(layout: &GridLayout, buf: &WordBuffer) {
    debug_assert_eq!(buf.len(), layout.buffer_len());
    let rw = layout.row_words();
    let pad = layout.padding();
    let grid = layout.grid_words();

    buf.copy_words(pad + grid - rw, pad - rw, rw);
    buf.copy_words(pad, pad + grid, rw);

    let last = rw - 1;
    let first_spare = (layout.width() % WORD_BITS) as u32;
    let height = layout.height();

    if layout.edge_cells_optimization() {
        // Spare bit `first_spare` carries the row's column 0; bit 31 carries
        // the next row's last column (the left neighbor of that row's column 0).
        let real = layout.last_word_mask();
        let last_cell_bit = first_spare - 1;

        let row_m1_last = buf.load(pad - 1);
        buf.store(0, ((row_m1_last >> last_cell_bit) & 1) << 31);

        for row in 0..=height {
            // Absolute base of row `row - 1`, covering rows -1..height-1.
            let base = pad - rw + row * rw;
            let cells = buf.load(base + last);
            let below = buf.load(base + rw + last);
            let first = buf.load(base) & 1;
            let wrapped_last = (below >> last_cell_bit) & 1;
            buf.store(
                base + last,
                (cells & real) | (first << first_spare) | (wrapped_last << 31),
            );
        }

        let base = pad + grid;
        let cells = buf.load(base + last);
        let first = buf.load(base) & 1;
        buf.store(base + last, (cells & real) | (first << first_spare));
    } else if layout.spare_bits() == 1 {
        // Single spare bit: mirror column 0 so the last column sees its right
        // neighbor. Column 0 itself is corrected by edge repair.
        for row in 0..height + 2 {
            let base = pad - rw + row * rw;
            let cells = buf.load(base + last);
            let first = buf.load(base) & 1;
            buf.store(base + last, (cells & !(1 << 31)) | (first << 31));
        }
    }
}

/// Double-buffered packed grid.
pub struct BitGrid {
    layout: GridLayout,
    current: Arc<WordBuffer>,
    next: Arc<WordBuffer>,
}

impl BitGrid {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        let layout = GridLayout::new(width, height)?;
        let len = layout.buffer_len();
        Ok(Self {
            layout,
            current: Arc::new(WordBuffer::zeroed(len)),
            next: Arc::new(WordBuffer::zeroed(len)),
        })
    }

    #[inline]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    #[inline]
    pub fn current(&self) -> &Arc<WordBuffer> {
        &self.current
    }

    #[inline]
    pub fn next(&self) -> &Arc<WordBuffer> {
        &self.next
    }

    /// Exchange buffer roles. O(1): only the handles move.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }

    /// Read a canonical cell index from `current`.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        let (offset, shift) = self.layout.locate(index);
        (self.current.load(offset) >> shift) & 1 != 0
    }

    /// Write a canonical cell index into `current`.
    #[inline]
    pub fn set(&self, index: usize, alive: bool) {
        let (offset, shift) = self.layout.locate(index);
        let word = self.current.load(offset);
        let word = (word & !(1 << shift)) | ((alive as u32) << shift);
        self.current.store(offset, word);
    }

    /// Read a cell of `next`.
    #[inline]
    pub fn get_next(&self, index: usize) -> bool {
        let (offset, shift) = self.layout.locate(index);
        (self.next.load(offset) >> shift) & 1 != 0
    }

    #[inline]
    pub fn word(&self, batch: usize) -> u32 {
        self.current.load(self.layout.offset(batch))
    }

    #[inline]
    pub fn set_next_word(&self, batch: usize, value: u32) {
        self.next.store(self.layout.offset(batch), value);
    }

    /// Rebuild the padding of `current`.
    pub fn fix_padding(&self) {
        fix_padding(&self.layout, &self.current);
    }

    /// Set every word of `current`, padding included.
    pub fn fill(&self, alive: bool) {
        self.current.fill(if alive { u32::MAX } else { 0 });
    }

    /// Real grid words of `current`, padding excluded.
    pub fn grid_snapshot(&self) -> Vec<u32> {
        let start = self.layout.padding();
        self.current
            .snapshot(start..start + self.layout.grid_words())
    }

    pub fn population(&self) -> u64 {
        let rw = self.layout.row_words();
        let mask = self.layout.last_word_mask();
        let mut total = 0u64;
        for row in 0..self.layout.height() {
            for col in 0..rw {
                let mut word = self.word(row * rw + col);
                if col == rw - 1 {
                    word &= mask;
                }
                total += word.count_ones() as u64;
            }
        }
        total
    }

    pub fn for_each_live<F: FnMut(usize, usize)>(&self, mut f: F) {
        let rw = self.layout.row_words();
        let mask = self.layout.last_word_mask();
        for y in 0..self.layout.height() {
            for col in 0..rw {
                let mut bits = self.word(y * rw + col);
                if col == rw - 1 {
                    bits &= mask;
                }
                while bits != 0 {
                    let bit = bits.trailing_zeros() as usize;
                    f(col * WORD_BITS + bit, y);
                    bits &= bits - 1;
                }
            }
        }
    }
}
