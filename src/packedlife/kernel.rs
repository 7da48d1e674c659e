//! Word-at-a-time neighbor-count kernel for PackedLife.
//!
//! Each of the three input rows is spread into 32 four-bit lanes so vertical
//! and horizontal sums of up to 9 never overflow a lane. Horizontal sums
//! reach two columns back, with the previous word's trailing columns carried
//! in a [`Remainder`]. The result therefore lags one cell: bit `c` holds the
//! next state of cell `c - 1`, and bit 0 belongs to the previous word.
//! [`sweep_range`] re-aligns the output through a 64-bit window.
//!
//! The rule is applied with `(alive_neighbours | center) == 3`, which holds
//! exactly for a live cell with 2 or 3 neighbours and a dead cell with 3.

use std::ops::Range;

use super::grid::{GridLayout, WordBuffer};
use super::task::CancelToken;

/// Words swept between cancellation checks.
pub const CANCEL_CHECK_WORDS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelBackend {
    Scalar,
    /// SSSE3 shuffles plus SSE4.1 extracts; x86_64 only.
    Sse41,
}

impl KernelBackend {
    pub fn is_available(self) -> bool {
        match self {
            KernelBackend::Scalar => true,
            KernelBackend::Sse41 => sse41_available(),
        }
    }

    /// Best backend supported by the running CPU.
    pub fn detect() -> Self {
        if std::env::var("PACKEDLIFE_AUTO_KERNEL").is_ok_and(|v| v == "0") {
            return KernelBackend::Scalar;
        }
        if sse41_available() {
            KernelBackend::Sse41
        } else {
            KernelBackend::Scalar
        }
    }
}

#[inline]
fn sse41_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_feature_detected!("ssse3") && std::is_x86_feature_detected!("sse4.1")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// State carried from one word to the next word of the same sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Remainder {
    /// Vertical sum (0..=3) of the previous word's column 30.
    pub second_last_sum: u8,
    /// Vertical sum (0..=3) of the previous word's column 31.
    pub last_sum: u8,
    /// Center-row bit of the previous word's column 31.
    pub last_center: u8,
}

/// A kernel bound to a backend the running CPU supports.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    backend: KernelBackend,
}

impl Kernel {
    /// Use `requested` when supported, otherwise fall back to scalar.
    pub fn new(requested: KernelBackend) -> Self {
        let backend = if requested.is_available() {
            requested
        } else {
            KernelBackend::Scalar
        };
        Self { backend }
    }

    pub fn detect() -> Self {
        Self::new(KernelBackend::detect())
    }

    pub fn backend(&self) -> KernelBackend {
        self.backend
    }

    #[inline(always)]
    pub fn step(&self, top: u32, cur: u32, bot: u32, remainder: Remainder) -> (u32, Remainder) {
        match self.backend {
            KernelBackend::Scalar => step_word_scalar(top, cur, bot, remainder),
            KernelBackend::Sse41 => {
                #[cfg(target_arch = "x86_64")]
                {
                    // Construction only keeps Sse41 when the CPU reports it.
                    unsafe { step_word_sse41(top, cur, bot, remainder) }
                }
                #[cfg(not(target_arch = "x86_64"))]
                {
                    step_word_scalar(top, cur, bot, remainder)
                }
            }
        }
    }
}

/// B3/S23 for a single cell.
#[inline(always)]
pub fn next_cell_state(alive: bool, neighbours: u32) -> bool {
    neighbours == 3 || (alive && neighbours == 2)
}

// ── Scalar kernel ───────────────────────────────────────────────────────

const LANE_ONES: u128 = u128::MAX / 0xF;
const LANE_THREES: u128 = LANE_ONES * 3;

/// Move bit `k` of a 16-bit value to bit `4k`.
#[inline(always)]
fn spread16(bits: u16) -> u64 {
    let mut v = bits as u64;
    v = (v | (v << 24)) & 0x0000_00FF_0000_00FF;
    v = (v | (v << 12)) & 0x000F_000F_000F_000F;
    v = (v | (v << 6)) & 0x0303_0303_0303_0303;
    (v | (v << 3)) & 0x1111_1111_1111_1111
}

/// Inverse of [`spread16`]: collect bit `4k` into bit `k`.
#[inline(always)]
fn gather16(lanes: u64) -> u16 {
    let mut v = lanes & 0x1111_1111_1111_1111;
    v = (v | (v >> 3)) & 0x0303_0303_0303_0303;
    v = (v | (v >> 6)) & 0x000F_000F_000F_000F;
    v = (v | (v >> 12)) & 0x0000_00FF_0000_00FF;
    ((v | (v >> 24)) & 0xFFFF) as u16
}

#[inline(always)]
fn spread_lanes(word: u32) -> u128 {
    spread16(word as u16) as u128 | ((spread16((word >> 16) as u16) as u128) << 64)
}

#[inline(always)]
fn gather_lanes(lanes: u128) -> u32 {
    gather16(lanes as u64) as u32 | ((gather16((lanes >> 64) as u64) as u32) << 16)
}

/// Portable kernel: 32 nibble lanes in a `u128`.
#[inline(always)]
pub fn step_word_scalar(top: u32, cur: u32, bot: u32, remainder: Remainder) -> (u32, Remainder) {
    let center = spread_lanes(cur);
    let columns = spread_lanes(top) + center + spread_lanes(bot);

    let last = remainder.last_sum as u128;
    let second_last = remainder.second_last_sum as u128;
    let shifted1 = (columns << 4) | last;
    let shifted2 = (columns << 8) | (last << 4) | second_last;
    let block = columns + shifted1 + shifted2;

    let center_lagged = (center << 4) | remainder.last_center as u128;
    let neighbours = block - center_lagged;

    let diff = (neighbours | center_lagged) ^ LANE_THREES;
    let hits = !(diff | (diff >> 1) | (diff >> 2) | (diff >> 3)) & LANE_ONES;

    let next = Remainder {
        second_last_sum: ((columns >> 120) & 0xF) as u8,
        last_sum: ((columns >> 124) & 0xF) as u8,
        last_center: (cur >> 31) as u8,
    };
    (gather_lanes(hits), next)
}

// ── SSE4.1 kernel ───────────────────────────────────────────────────────

/// Byte `k` gets bit `k` in its low nibble and bit `16 + k` in its high nibble.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn sse_spread_lanes(word: u32) -> std::arch::x86_64::__m128i {
    use std::arch::x86_64::{
        _mm_and_si128, _mm_cmpeq_epi8, _mm_or_si128, _mm_set_epi64x, _mm_set1_epi8,
        _mm_set1_epi32, _mm_set1_epi64x, _mm_shuffle_epi8,
    };
    unsafe {
        let bit_select = _mm_set1_epi64x(0x8040_2010_0804_0201u64 as i64);
        let low_bytes = _mm_set_epi64x(0x0101_0101_0101_0101, 0);
        let high_bytes = _mm_set_epi64x(0x0303_0303_0303_0303, 0x0202_0202_0202_0202);
        let num = _mm_set1_epi32(word as i32);

        let low = _mm_and_si128(
            _mm_cmpeq_epi8(
                _mm_and_si128(_mm_shuffle_epi8(num, low_bytes), bit_select),
                bit_select,
            ),
            _mm_set1_epi8(0x01),
        );
        let high = _mm_and_si128(
            _mm_cmpeq_epi8(
                _mm_and_si128(_mm_shuffle_epi8(num, high_bytes), bit_select),
                bit_select,
            ),
            _mm_set1_epi8(0x10),
        );
        _mm_or_si128(low, high)
    }
}

/// SSE kernel, bit-identical to [`step_word_scalar`].
///
/// # Safety
/// The CPU must support SSSE3 and SSE4.1.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3,sse4.1")]
pub unsafe fn step_word_sse41(
    top: u32,
    cur: u32,
    bot: u32,
    remainder: Remainder,
) -> (u32, Remainder) {
    use std::arch::x86_64::{
        _mm_add_epi8, _mm_alignr_epi8, _mm_and_si128, _mm_andnot_si128, _mm_cmpeq_epi8,
        _mm_cvtsi32_si128, _mm_extract_epi8, _mm_extract_epi16, _mm_movemask_epi8,
        _mm_or_si128, _mm_set1_epi8, _mm_slli_epi16, _mm_sub_epi8,
    };
    unsafe {
        let center = sse_spread_lanes(cur);
        let columns = _mm_add_epi8(
            sse_spread_lanes(top),
            _mm_add_epi8(center, sse_spread_lanes(bot)),
        );

        let next = Remainder {
            second_last_sum: ((_mm_extract_epi16::<7>(columns) >> 4) & 0xF) as u8,
            last_sum: ((_mm_extract_epi16::<7>(columns) >> 12) & 0xF) as u8,
            last_center: ((_mm_extract_epi8::<15>(center) >> 4) & 0x1) as u8,
        };

        // Low nibbles moved up so byte-aligned shifts carry lane 15 into lane 16.
        let low_mask = _mm_set1_epi8(0x0F);
        let columns_carry = _mm_slli_epi16::<4>(_mm_and_si128(columns, low_mask));
        let shifted1 = _mm_alignr_epi8::<15>(columns, columns_carry);
        let shifted2 = _mm_alignr_epi8::<14>(columns, columns_carry);

        let carried = remainder.second_last_sum as i32
            + remainder.last_sum as i32
            + ((remainder.last_sum as i32) << 8);
        let block = _mm_add_epi8(
            _mm_add_epi8(_mm_add_epi8(shifted2, shifted1), columns),
            _mm_cvtsi32_si128(carried),
        );

        let center_carry = _mm_slli_epi16::<4>(_mm_and_si128(center, low_mask));
        let center_lagged = _mm_or_si128(
            _mm_alignr_epi8::<15>(center, center_carry),
            _mm_cvtsi32_si128(remainder.last_center as i32),
        );

        let neighbours = _mm_sub_epi8(block, center_lagged);
        let cells = _mm_or_si128(neighbours, center_lagged);

        let lower = _mm_movemask_epi8(_mm_cmpeq_epi8(
            _mm_and_si128(cells, low_mask),
            _mm_set1_epi8(0x03),
        )) as u32;
        let upper = _mm_movemask_epi8(_mm_cmpeq_epi8(
            _mm_andnot_si128(low_mask, cells),
            _mm_set1_epi8(0x30),
        )) as u32;

        (lower | (upper << 16), next)
    }
}

// ── Sweeps over a buffer ────────────────────────────────────────────────

/// Build the incoming remainder for `batch` from the word before it.
#[inline]
pub fn seed_remainder(buf: &WordBuffer, layout: &GridLayout, batch: usize) -> Remainder {
    let prev = layout.offset(batch) - 1;
    let rw = layout.row_words();
    let (top, cur, bot) = (buf.load(prev - rw), buf.load(prev), buf.load(prev + rw));
    let bit = |word: u32, shift: u32| ((word >> shift) & 1) as u8;
    Remainder {
        second_last_sum: bit(top, 30) + bit(cur, 30) + bit(bot, 30),
        last_sum: bit(top, 31) + bit(cur, 31) + bit(bot, 31),
        last_center: bit(cur, 31),
    }
}

/// Run the kernel on one batch of `buf`.
#[inline(always)]
pub fn step_batch(
    kernel: &Kernel,
    buf: &WordBuffer,
    layout: &GridLayout,
    batch: usize,
    remainder: Remainder,
) -> (u32, Remainder) {
    let offset = layout.offset(batch);
    let rw = layout.row_words();
    kernel.step(
        buf.load(offset - rw),
        buf.load(offset),
        buf.load(offset + rw),
        remainder,
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    Cancelled,
}

/// Compute `next[range]` from `current`.
///
/// Reads one batch past `range.end` to flush the lagged window, so the
/// padding after the grid must be in place. Checks `cancel` every
/// [`CANCEL_CHECK_WORDS`] words.
pub fn sweep_range(
    kernel: &Kernel,
    layout: &GridLayout,
    current: &WordBuffer,
    next: &WordBuffer,
    range: Range<usize>,
    cancel: &CancelToken,
) -> SweepOutcome {
    if range.is_empty() {
        return SweepOutcome::Completed;
    }

    let remainder = seed_remainder(current, layout, range.start);
    let (first, mut remainder) = step_batch(kernel, current, layout, range.start, remainder);
    let mut window = (first as u64) << 31;

    let mut batch = range.start + 1;
    while batch <= range.end {
        let group_end = (batch + CANCEL_CHECK_WORDS).min(range.end + 1);
        for b in batch..group_end {
            let (word, carried) = step_batch(kernel, current, layout, b, remainder);
            remainder = carried;
            window = (window >> 32) | ((word as u64) << 31);
            next.store(layout.offset(b - 1), window as u32);
        }
        batch = group_end;

        if cancel.is_cancelled() {
            return SweepOutcome::Cancelled;
        }
    }

    SweepOutcome::Completed
}
