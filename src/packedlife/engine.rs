//! PackedLife engine: a fixed-size toroidal B3/S23 grid advanced by a pool of
//! long-lived workers, each owning one static word range of the next buffer.
//!
//! The engine is in one of three phases:
//! - `Idle`: no workers deployed, `next` is meaningless (after `new`/`stop`)
//! - `Running`: workers are computing `next` from `current`
//! - `Settled`: `next` holds the successor of `current`, edits included
//!
//! Edits made while `Running` land in `current` immediately and are recorded;
//! once the workers finish, the words around every edited cell are
//! recomputed so the edit is never lost.

use std::ops::Range;
use std::sync::Arc;

use super::edge::{next_state_at, repair_edges};
use super::error::{GridError, Result};
use super::grid::{BitGrid, GridLayout, WORD_BITS};
use super::kernel::{
    Kernel, KernelBackend, Remainder, SweepOutcome, seed_remainder, step_batch, sweep_range,
};
use super::partition::{DEFAULT_FLUSH_FRACTION, plan};
use super::sink::{BufferRole, OutputSink, WordChange};
use super::task::{CancelToken, Task};

#[inline]
fn auto_task_count_for_physical(physical: usize) -> usize {
    let physical = physical.max(1);
    if physical <= 8 {
        physical
    } else {
        physical.div_ceil(2).max(6)
    }
}

#[inline]
fn auto_task_count() -> usize {
    auto_task_count_for_physical(num_cpus::get_physical())
}

fn resolve_task_count(config: &PackedLifeConfig) -> Result<usize> {
    match config.task_count {
        Some(0) => Err(GridError::InvalidTaskCount(0)),
        Some(n) => Ok(n),
        None => Ok(auto_task_count()),
    }
}

fn resolve_flush_fraction(config: &PackedLifeConfig) -> Result<f64> {
    let fraction = config.flush_fraction.unwrap_or(DEFAULT_FLUSH_FRACTION);
    if !fraction.is_finite() || fraction < 0.0 {
        return Err(GridError::InvalidFlushFraction(fraction));
    }
    Ok(fraction)
}

/// Configuration for a PackedLife engine instance.
///
/// Use `PackedLifeConfig::default()` for auto-tuned defaults, or customise
/// individual knobs via the builder methods.
#[derive(Clone, Debug, Default)]
pub struct PackedLifeConfig {
    /// Number of worker slots (and pool threads).
    /// `None` means auto-detect from physical cores.
    pub task_count: Option<usize>,
    /// Relative flush cost used to grow partition ranges.
    /// `None` means 0.05.
    pub flush_fraction: Option<f64>,
    /// Kernel backend selection.
    /// `None` means auto-detect; set `PACKEDLIFE_AUTO_KERNEL=0` to force
    /// scalar. A forced backend the CPU lacks degrades to scalar.
    pub kernel: Option<KernelBackend>,
}

impl PackedLifeConfig {
    /// Set an explicit worker count. Zero is rejected by `PackedLife::new`.
    pub fn task_count(mut self, n: usize) -> Self {
        self.task_count = Some(n);
        self
    }

    pub fn flush_fraction(mut self, fraction: f64) -> Self {
        self.flush_fraction = Some(fraction);
        self
    }

    /// Force a specific kernel backend.
    pub fn kernel(mut self, backend: KernelBackend) -> Self {
        self.kernel = Some(backend);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Settled,
}

pub struct PackedLife {
    grid: BitGrid,
    kernel: Kernel,
    ranges: Vec<Range<usize>>,
    tasks: Vec<Task<SweepOutcome>>,
    cancel: CancelToken,
    sink: Arc<dyn OutputSink>,
    /// Cell indices edited while workers were running.
    dirty: Vec<usize>,
    phase: Phase,
    generation: u64,
}

impl PackedLife {
    pub fn new(
        width: usize,
        height: usize,
        config: PackedLifeConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        let grid = BitGrid::new(width, height)?;
        let task_count = resolve_task_count(&config)?;
        let flush_fraction = resolve_flush_fraction(&config)?;
        let kernel = match config.kernel {
            Some(backend) => Kernel::new(backend),
            None => Kernel::detect(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(task_count)
            .thread_name(|i| format!("packed-life-{i}"))
            .panic_handler(|_| tracing::error!("packed-life worker panicked"))
            .build()
            .map_err(|e| GridError::ThreadPool(e.to_string()))?;
        let pool = Arc::new(pool);

        let ranges = plan(grid.layout().grid_words(), task_count, flush_fraction);
        tracing::debug!(
            width,
            height,
            task_count,
            backend = ?kernel.backend(),
            edge_cells_optimization = grid.layout().edge_cells_optimization(),
            "packed-life engine created"
        );
        tracing::debug!(?ranges, "partition plan");

        Ok(Self {
            grid,
            kernel,
            ranges,
            tasks: (0..task_count).map(|_| Task::new(pool.clone())).collect(),
            cancel: CancelToken::default(),
            sink,
            dirty: Vec::new(),
            phase: Phase::Idle,
            generation: 0,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    #[inline]
    pub fn width(&self) -> usize {
        self.grid.layout().width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.grid.layout().height()
    }

    /// Number of buffer swaps so far.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Word range (batch indices) owned by each worker.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn kernel_backend(&self) -> KernelBackend {
        self.kernel.backend()
    }

    pub fn edge_cells_optimization(&self) -> bool {
        self.grid.layout().edge_cells_optimization()
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Edits waiting for repair.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Live cells in the current generation.
    pub fn population(&self) -> u64 {
        self.grid.population()
    }

    pub fn for_each_live<F: FnMut(usize, usize)>(&self, f: F) {
        self.grid.for_each_live(f);
    }

    /// Token observed by the workers. Cancelling it ends the generation in
    /// flight; the engine falls back to `Idle` when it is awaited.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    // ── Cell access ─────────────────────────────────────────────────────

    /// Read a cell of the current generation. Indices wrap on both axes.
    pub fn read_cell(&self, index: i64) -> bool {
        self.grid.get(self.grid.layout().torus().normalize(index))
    }

    /// Read a cell of the settled successor generation.
    ///
    /// `None` unless the engine is settled.
    pub fn read_next_cell(&self, index: i64) -> Option<bool> {
        (self.phase == Phase::Settled)
            .then(|| self.grid.get_next(self.grid.layout().torus().normalize(index)))
    }

    pub fn write_cell(&mut self, index: i64, alive: bool) {
        self.write_cells(std::iter::once((index, alive)));
    }

    /// Write several cells, then send one notification per distinct word.
    pub fn write_cells<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (i64, bool)>,
    {
        let layout = *self.grid.layout();
        let torus = layout.torus();
        let track = self.phase != Phase::Idle;

        let mut touched = Vec::new();
        for (index, alive) in cells {
            let index = torus.normalize(index);
            self.grid.set(index, alive);
            touched.push(layout.batch_of(index));
            if track {
                self.dirty.push(index);
            }
        }
        if touched.is_empty() {
            return;
        }

        touched.sort_unstable();
        touched.dedup();
        let words: Vec<u32> = touched
            .iter()
            .map(|&batch| self.grid.word(batch) & Self::cell_mask(&layout, batch))
            .collect();
        let changes: Vec<WordChange<'_>> = touched
            .iter()
            .zip(&words)
            .map(|(&batch, word)| {
                WordChange::new(BufferRole::Current, batch as u32, std::slice::from_ref(word))
            })
            .collect();
        self.sink.write_batch(&changes);

        // Between generations nothing else would pick the edit up.
        if self.phase == Phase::Settled {
            self.grid.fix_padding();
            self.repair_dirty();
        }
    }

    /// Overwrite every cell, cancelling and redeploying any running workers.
    pub fn fill(&mut self, alive: bool) -> Result<()> {
        let was_idle = self.phase == Phase::Idle;
        self.join_cancelled();

        self.grid.fill(alive);
        self.dirty.clear();
        let mut data = self.grid.grid_snapshot();
        self.grid.layout().mask_spare_bits(0, &mut data);
        self.sink
            .write(WordChange::new(BufferRole::Current, 0, &data));

        if was_idle {
            Ok(())
        } else {
            self.launch()
        }
    }

    // ── Generation control ──────────────────────────────────────────────

    /// Swap in the settled successor and start computing the one after it.
    pub fn start_generation(&mut self) -> Result<()> {
        match self.phase {
            Phase::Settled => {
                self.grid.swap();
                self.generation += 1;
                self.sink.buffers_swapped();
                self.launch()
            }
            Phase::Running => {
                tracing::warn!(generation = self.generation, "start_generation while running");
                Err(GridError::AlreadyRunning)
            }
            Phase::Idle => {
                tracing::warn!(generation = self.generation, "start_generation while stopped");
                Err(GridError::WorkersStopped)
            }
        }
    }

    /// Block until the running generation settles.
    pub fn await_generation(&mut self) -> Result<()> {
        match self.phase {
            Phase::Settled => Ok(()),
            Phase::Idle => Err(GridError::WorkersStopped),
            Phase::Running => {
                let outcomes: Vec<_> = self.tasks.iter_mut().map(Task::wait_for_result).collect();
                self.settle(&outcomes)
            }
        }
    }

    /// Settle the running generation if every worker is done.
    ///
    /// Returns `Ok(false)` while any worker is still busy.
    pub fn try_finish_generation(&mut self) -> Result<bool> {
        match self.phase {
            Phase::Settled => Ok(true),
            Phase::Idle => Err(GridError::WorkersStopped),
            Phase::Running => {
                let mut all_ready = true;
                for task in &mut self.tasks {
                    all_ready &= task.result_ready();
                }
                if !all_ready {
                    return Ok(false);
                }
                self.await_generation().map(|()| true)
            }
        }
    }

    /// Cancel the running generation and wait for every worker to return.
    /// The engine is `Idle` afterwards.
    pub fn stop(&mut self) {
        self.join_cancelled();
        self.dirty.clear();
        tracing::debug!(generation = self.generation, "workers stopped");
    }

    /// Recompute the successor of the current generation after `stop`.
    ///
    /// No-op when settled; rejected while workers are running.
    pub fn resume(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle => self.launch(),
            Phase::Settled => Ok(()),
            Phase::Running => {
                tracing::warn!(generation = self.generation, "resume while running");
                Err(GridError::AlreadyRunning)
            }
        }
    }

    /// Advance one generation and settle the next one.
    pub fn step(&mut self) -> Result<()> {
        if self.is_stopped() {
            self.resume()?;
        }
        self.await_generation()?;
        self.start_generation()?;
        self.await_generation()
    }

    pub fn step_n(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Fix padding and deploy every worker on its range.
    fn launch(&mut self) -> Result<()> {
        self.grid.fix_padding();
        self.cancel.reset();

        let layout = *self.grid.layout();
        for (task, range) in self.tasks.iter_mut().zip(&self.ranges) {
            let current = Arc::clone(self.grid.current());
            let next = Arc::clone(self.grid.next());
            let kernel = self.kernel;
            let cancel = self.cancel.clone();
            let sink = Arc::clone(&self.sink);
            let range = range.clone();

            task.start(move || {
                let mut outcome =
                    sweep_range(&kernel, &layout, &current, &next, range.clone(), &cancel);
                if outcome == SweepOutcome::Completed {
                    outcome = repair_edges(&layout, &current, &next, range.clone(), &cancel);
                }
                if outcome == SweepOutcome::Completed && !range.is_empty() {
                    let mut data =
                        next.snapshot(layout.offset(range.start)..layout.offset(range.end));
                    layout.mask_spare_bits(range.start, &mut data);
                    sink.write(WordChange::new(BufferRole::Next, range.start as u32, &data));
                }
                tracing::trace!(start = range.start, end = range.end, ?outcome, "worker finished");
                outcome
            })?;
        }

        self.phase = Phase::Running;
        Ok(())
    }

    /// Cancel, join every worker, and drop to `Idle`.
    fn join_cancelled(&mut self) {
        self.cancel.cancel();
        for task in &mut self.tasks {
            task.wait_for_result();
        }
        self.cancel.reset();
        self.phase = Phase::Idle;
    }

    fn settle(&mut self, outcomes: &[Option<SweepOutcome>]) -> Result<()> {
        let completed = outcomes
            .iter()
            .all(|outcome| *outcome == Some(SweepOutcome::Completed));
        if !completed {
            tracing::error!(
                generation = self.generation,
                ?outcomes,
                "generation did not complete"
            );
            self.cancel.reset();
            self.dirty.clear();
            self.phase = Phase::Idle;
            return Err(GridError::WorkersStopped);
        }

        self.grid.fix_padding();
        self.repair_dirty();
        self.phase = Phase::Settled;
        Ok(())
    }

    /// Recompute every `next` word in the 3x3 neighbourhoods of edited cells.
    /// Padding of `current` must already be fixed.
    fn repair_dirty(&mut self) {
        if self.dirty.is_empty() {
            return;
        }

        let layout = *self.grid.layout();
        let torus = layout.torus();
        let mut batches = Vec::with_capacity(self.dirty.len() * 9);
        for &index in &self.dirty {
            let (x, y) = torus.to_coord(index as i64);
            let (x, y) = (x as i64, y as i64);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    batches.push(layout.batch_of(torus.to_index(x + dx, y + dy)));
                }
            }
        }
        batches.sort_unstable();
        batches.dedup();

        let words: Vec<u32> = batches
            .iter()
            .map(|&batch| {
                let word = self.recompute_word(&layout, batch);
                self.grid.set_next_word(batch, word);
                word & Self::cell_mask(&layout, batch)
            })
            .collect();
        let changes: Vec<WordChange<'_>> = batches
            .iter()
            .zip(&words)
            .map(|(&batch, word)| {
                WordChange::new(BufferRole::Next, batch as u32, std::slice::from_ref(word))
            })
            .collect();
        self.sink.write_batch(&changes);

        tracing::debug!(
            edits = self.dirty.len(),
            words = batches.len(),
            "repaired edited neighbourhoods"
        );
        self.dirty.clear();
    }

    /// Bits of `batch` that hold cells of this row.
    #[inline]
    fn cell_mask(layout: &GridLayout, batch: usize) -> u32 {
        if layout.is_last_word(batch) {
            layout.last_word_mask()
        } else {
            u32::MAX
        }
    }

    /// Successor of one word of `current`, computed in isolation.
    fn recompute_word(&self, layout: &GridLayout, batch: usize) -> u32 {
        let current = self.grid.current();
        let explicit_edges = !layout.edge_cells_optimization();
        let first_col = layout.is_first_word(batch);
        let last_col = layout.is_last_word(batch);

        let remainder = if explicit_edges && first_col {
            Remainder::default()
        } else {
            seed_remainder(current, layout, batch)
        };
        let (low, remainder) = step_batch(&self.kernel, current, layout, batch, remainder);
        let mut word = if explicit_edges && last_col {
            low >> 1
        } else {
            let (high, _) = step_batch(&self.kernel, current, layout, batch + 1, remainder);
            (low >> 1) | (high << 31)
        };

        if explicit_edges {
            let row = batch / layout.row_words();
            if first_col {
                let alive = next_state_at(current, layout, 0, row);
                word = (word & !1) | alive as u32;
            }
            if last_col {
                let x = layout.width() - 1;
                let shift = x % WORD_BITS;
                let alive = next_state_at(current, layout, x, row);
                word = (word & !(1 << shift)) | ((alive as u32) << shift);
            }
        }
        word
    }
}

impl Drop for PackedLife {
    fn drop(&mut self) {
        self.join_cancelled();
    }
}

#[cfg(test)]
mod tests {
    use super::{PackedLife, PackedLifeConfig, auto_task_count_for_physical};
    use crate::packedlife::error::GridError;
    use crate::packedlife::kernel::KernelBackend;
    use crate::packedlife::sink::NullSink;
    use std::sync::Arc;

    fn engine(width: usize, height: usize, tasks: usize) -> PackedLife {
        PackedLife::new(
            width,
            height,
            PackedLifeConfig::default().task_count(tasks),
            Arc::new(NullSink),
        )
        .unwrap()
    }

    #[test]
    fn auto_task_count_policy() {
        assert_eq!(auto_task_count_for_physical(0), 1);
        assert_eq!(auto_task_count_for_physical(4), 4);
        assert_eq!(auto_task_count_for_physical(8), 8);
        assert_eq!(auto_task_count_for_physical(10), 6);
        assert_eq!(auto_task_count_for_physical(16), 8);
        assert_eq!(auto_task_count_for_physical(32), 16);
    }

    #[test]
    fn configuration_errors() {
        let sink = Arc::new(NullSink);
        let err = |w, h, config| PackedLife::new(w, h, config, sink.clone()).err();
        assert_eq!(
            err(0, 5, PackedLifeConfig::default()),
            Some(GridError::InvalidDimensions {
                width: 0,
                height: 5
            })
        );
        assert_eq!(
            err(8, 8, PackedLifeConfig::default().task_count(0)),
            Some(GridError::InvalidTaskCount(0))
        );
        assert_eq!(
            err(8, 8, PackedLifeConfig::default().flush_fraction(-0.5)),
            Some(GridError::InvalidFlushFraction(-0.5))
        );
    }

    #[test]
    fn forced_scalar_kernel_is_honoured() {
        let life = PackedLife::new(
            16,
            16,
            PackedLifeConfig::default()
                .task_count(1)
                .kernel(KernelBackend::Scalar),
            Arc::new(NullSink),
        )
        .unwrap();
        assert_eq!(life.kernel_backend(), KernelBackend::Scalar);
    }

    #[test]
    fn starts_idle_and_reports_misuse() {
        let mut life = engine(40, 10, 2);
        assert!(life.is_stopped());
        assert_eq!(life.start_generation(), Err(GridError::WorkersStopped));
        assert_eq!(life.await_generation(), Err(GridError::WorkersStopped));
        assert_eq!(life.try_finish_generation(), Err(GridError::WorkersStopped));

        life.resume().unwrap();
        assert!(life.is_running());
        assert_eq!(life.start_generation(), Err(GridError::AlreadyRunning));
        life.await_generation().unwrap();
        assert!(!life.is_running() && !life.is_stopped());
        assert_eq!(life.generation(), 0);
    }

    #[test]
    fn resume_while_running_is_rejected() {
        let mut life = engine(4096, 64, 2);
        life.resume().unwrap();
        assert_eq!(life.resume(), Err(GridError::AlreadyRunning));
        assert!(life.is_running());

        life.await_generation().unwrap();
        // Settled: nothing to recompute.
        life.resume().unwrap();
        assert!(!life.is_running() && !life.is_stopped());
        life.step().unwrap();
        assert_eq!(life.generation(), 1);
    }

    #[test]
    fn ranges_cover_all_words() {
        let life = engine(100, 37, 5);
        assert_eq!(life.task_count(), 5);
        let ranges = life.ranges();
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[4].end, 4 * 37);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn cells_wrap_on_both_axes() {
        let mut life = engine(10, 4, 1);
        life.write_cell(-1, true);
        assert!(life.read_cell(39));
        assert!(life.read_cell(-1));
        life.write_cell(40 + 3, true);
        assert!(life.read_cell(3));
        assert_eq!(life.population(), 2);
        assert_eq!(life.dirty_len(), 0);
    }

    #[test]
    fn blinker_oscillates() {
        let mut life = engine(8, 8, 2);
        life.write_cells([(3 * 8 + 2, true), (3 * 8 + 3, true), (3 * 8 + 4, true)]);
        life.step().unwrap();
        assert_eq!(life.generation(), 1);
        let mut live = Vec::new();
        life.for_each_live(|x, y| live.push((x, y)));
        assert_eq!(live, vec![(3, 2), (3, 3), (3, 4)]);
        life.step().unwrap();
        assert!(life.read_cell(3 * 8 + 2) && life.read_cell(3 * 8 + 4));
        assert_eq!(life.population(), 3);
    }

    #[test]
    fn edits_between_generations_reach_next() {
        let mut life = engine(33, 9, 2);
        life.resume().unwrap();
        life.await_generation().unwrap();
        assert_eq!(life.read_next_cell(0), Some(false));

        // An L-tromino: the missing corner is born.
        life.write_cells([(0, true), (1, true), (33, true)]);
        assert_eq!(life.dirty_len(), 0);
        assert_eq!(life.read_next_cell(34), Some(true));

        life.start_generation().unwrap();
        life.await_generation().unwrap();
        assert_eq!(life.population(), 4);
    }

    #[test]
    fn stop_returns_to_idle() {
        let mut life = engine(256, 256, 3);
        life.fill(true).unwrap();
        life.resume().unwrap();
        life.write_cell(5, false);
        assert_eq!(life.dirty_len(), 1);
        life.stop();
        assert!(life.is_stopped());
        assert_eq!(life.dirty_len(), 0);
        assert_eq!(life.read_next_cell(0), None);
        assert_eq!(life.start_generation(), Err(GridError::WorkersStopped));
        assert_eq!(life.generation(), 0);
        assert!(!life.read_cell(5));
    }
}
