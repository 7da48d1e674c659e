use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use packed_life::packedlife::{
    BufferRole, GridError, NullSink, OutputSink, PackedLife, PackedLifeConfig, WordChange,
};
use rand::Rng;
use rand::SeedableRng;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Write {
        buffer: BufferRole,
        start_word: u32,
        data: Vec<u32>,
    },
    Swapped,
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl OutputSink for RecordingSink {
    fn write(&self, change: WordChange<'_>) {
        assert_eq!(change.word_count as usize, change.data.len());
        self.events.lock().unwrap().push(Event::Write {
            buffer: change.buffer,
            start_word: change.start_word,
            data: change.data.to_vec(),
        });
    }

    fn buffers_swapped(&self) {
        self.events.lock().unwrap().push(Event::Swapped);
    }
}

fn engine(width: usize, height: usize, tasks: usize) -> PackedLife {
    PackedLife::new(
        width,
        height,
        PackedLifeConfig::default().task_count(tasks),
        Arc::new(NullSink),
    )
    .unwrap()
}

fn snapshot(engine: &PackedLife) -> Vec<bool> {
    (0..engine.width() * engine.height())
        .map(|i| engine.read_cell(i as i64))
        .collect()
}

fn next_snapshot(engine: &PackedLife) -> Vec<bool> {
    (0..engine.width() * engine.height())
        .map(|i| engine.read_next_cell(i as i64).unwrap())
        .collect()
}

fn step_naive(cells: &[bool], width: usize, height: usize) -> Vec<bool> {
    let (w, h) = (width as i64, height as i64);
    let mut next = vec![false; cells.len()];
    for y in 0..h {
        for x in 0..w {
            let mut neighbors = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if (dx, dy) != (0, 0)
                        && cells[((y + dy).rem_euclid(h) * w + (x + dx).rem_euclid(w)) as usize]
                    {
                        neighbors += 1;
                    }
                }
            }
            let alive = cells[(y * w + x) as usize];
            next[(y * w + x) as usize] = neighbors == 3 || (alive && neighbors == 2);
        }
    }
    next
}

fn seed_random(engine: &mut PackedLife, seed: u64) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let cells: Vec<_> = (0..engine.width() * engine.height())
        .map(|i| (i as i64, rng.random::<f64>() < 0.4))
        .collect();
    engine.write_cells(cells);
}

#[test]
fn edits_during_generation_are_repaired() {
    // Embedded wraparound, one spare bit, and whole-word rows.
    for width in [50usize, 63, 96] {
        let height = 30;
        let mut life = engine(width, height, 3);
        seed_random(&mut life, width as u64);
        life.resume().unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(0xED17 + width as u64);
        let mut edits: Vec<(i64, bool)> = (0..60)
            .map(|_| {
                let index = rng.random_range(0..(width * height) as i64);
                (index, rng.random::<bool>())
            })
            .collect();
        // Corners and seams, addressed through wrapping indices.
        edits.extend([(-1, true), (0, true), (width as i64 - 1, false), (-(width as i64), true)]);
        life.write_cells(edits);
        assert!(life.dirty_len() > 0);

        life.await_generation().unwrap();
        assert_eq!(life.dirty_len(), 0);

        let current = snapshot(&life);
        let expected = step_naive(&current, width, height);
        assert_eq!(next_snapshot(&life), expected, "width={width}");

        life.start_generation().unwrap();
        assert_eq!(snapshot(&life), expected, "width={width}");
        life.await_generation().unwrap();
    }
}

#[test]
fn polling_settles_the_same_way() {
    let (width, height) = (70, 20);
    let mut life = engine(width, height, 2);
    seed_random(&mut life, 42);
    life.resume().unwrap();
    life.write_cell(5, true);
    life.write_cell(-3, true);

    while !life.try_finish_generation().unwrap() {
        std::thread::yield_now();
    }
    assert_eq!(life.dirty_len(), 0);
    let expected = step_naive(&snapshot(&life), width, height);
    assert_eq!(next_snapshot(&life), expected);
}

#[test]
fn edits_between_generations_are_not_lost() {
    let (width, height) = (64, 16);
    let mut life = engine(width, height, 2);
    seed_random(&mut life, 9);
    life.step().unwrap();

    // Settled: the successor is already computed.
    life.write_cells([(0, true), (1, true), (64, true), (127, false)]);
    let expected = step_naive(&snapshot(&life), width, height);
    life.start_generation().unwrap();
    assert_eq!(snapshot(&life), expected);
}

#[test]
fn fill_true_then_false_clears_everything() {
    let mut life = engine(90, 33, 4);
    seed_random(&mut life, 3);
    life.resume().unwrap();
    life.write_cell(17, true);

    life.fill(true).unwrap();
    assert_eq!(life.population(), 90 * 33);
    life.fill(false).unwrap();
    assert_eq!(life.dirty_len(), 0);
    assert_eq!(life.population(), 0);
    assert!(life.is_running());

    life.await_generation().unwrap();
    life.step_n(3).unwrap();
    assert_eq!(life.population(), 0);
    assert!(snapshot(&life).iter().all(|&alive| !alive));
}

#[test]
fn fill_true_dies_out_on_the_next_generation() {
    let mut life = engine(40, 40, 2);
    life.fill(true).unwrap();
    assert!(life.is_stopped());
    life.step().unwrap();
    assert_eq!(life.population(), 0);
}

#[test]
fn stop_cancels_without_swapping() {
    let (width, height) = (2048, 1024);
    let mut life = engine(width, height, 4);
    seed_random(&mut life, 77);
    let before = life.population();

    life.resume().unwrap();
    life.stop();
    assert!(life.is_stopped());
    assert_eq!(life.generation(), 0);
    assert_eq!(life.start_generation(), Err(GridError::WorkersStopped));
    assert_eq!(life.population(), before);

    // The cancelled successor is recomputed from scratch on resume.
    life.step().unwrap();
    assert_eq!(life.generation(), 1);
}

#[test]
fn stop_then_resume_matches_uninterrupted_run() {
    let (width, height) = (300, 200);
    let mut interrupted = engine(width, height, 3);
    let mut straight = engine(width, height, 3);
    seed_random(&mut interrupted, 5);
    seed_random(&mut straight, 5);

    for _ in 0..3 {
        interrupted.step().unwrap();
        interrupted.stop();
        interrupted.resume().unwrap();
        straight.step().unwrap();
    }
    interrupted.step().unwrap();
    straight.step().unwrap();
    assert_eq!(interrupted.generation(), 4);
    assert_eq!(straight.generation(), 4);
    assert_eq!(snapshot(&interrupted), snapshot(&straight));
}

#[test]
fn sink_sees_edits_sweeps_swaps_and_repairs() {
    let (width, height) = (64, 8);
    let sink = Arc::new(RecordingSink::default());
    let mut life = PackedLife::new(
        width,
        height,
        PackedLifeConfig::default().task_count(3),
        sink.clone(),
    )
    .unwrap();

    // Two cells share word 0, one sits in word 3.
    life.write_cells([(0, true), (1, true), (64 + 40, true)]);
    let events = sink.take();
    let starts: Vec<u32> = events
        .iter()
        .map(|event| match event {
            Event::Write {
                buffer: BufferRole::Current,
                start_word,
                data,
            } => {
                assert_eq!(data.len(), 1);
                *start_word
            }
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(starts, vec![0, 3]);

    // Each worker flushes its own range once.
    life.resume().unwrap();
    life.await_generation().unwrap();
    let mut covered = HashSet::new();
    for event in sink.take() {
        match event {
            Event::Write {
                buffer: BufferRole::Next,
                start_word,
                data,
            } => {
                for word in start_word..start_word + data.len() as u32 {
                    assert!(covered.insert(word), "word {word} flushed twice");
                }
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(covered.len(), 2 * height);

    life.start_generation().unwrap();
    life.await_generation().unwrap();
    let events = sink.take();
    assert_eq!(events.first(), Some(&Event::Swapped));

    // A settled edit is repaired at once: 3x3 neighbourhood of (10, 4).
    life.write_cell(4 * 64 + 10, true);
    let repaired: Vec<u32> = sink
        .take()
        .into_iter()
        .filter_map(|event| match event {
            Event::Write {
                buffer: BufferRole::Next,
                start_word,
                ..
            } => Some(start_word),
            _ => None,
        })
        .collect();
    assert_eq!(repaired, vec![6, 8, 10]);

    life.fill(false).unwrap();
    let events = sink.take();
    match &events[0] {
        Event::Write {
            buffer: BufferRole::Current,
            start_word: 0,
            data,
        } => assert_eq!(data.len(), 2 * height),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn notified_words_carry_no_spare_bits() {
    // 40 columns: two words per row, only the low 8 bits of the second are cells.
    let (width, height) = (40, 12);
    let mask = 0xFFu32;
    let sink = Arc::new(RecordingSink::default());
    let mut life = PackedLife::new(
        width,
        height,
        PackedLifeConfig::default().task_count(2),
        sink.clone(),
    )
    .unwrap();
    assert!(life.edge_cells_optimization());

    seed_random(&mut life, 40);
    life.resume().unwrap();
    life.write_cells([(0, true), (39, true), (-1, true)]);
    life.await_generation().unwrap();
    life.step_n(3).unwrap();
    life.write_cell(2 * 40 + 39, true);
    life.fill(true).unwrap();

    let events = sink.take();
    assert!(events.iter().any(|e| matches!(e, Event::Write { buffer: BufferRole::Next, .. })));
    for event in events {
        if let Event::Write {
            buffer,
            start_word,
            data,
        } = event
        {
            for (batch, word) in (start_word..).zip(data) {
                if batch % 2 == 1 {
                    assert_eq!(word & !mask, 0, "{buffer:?} word {batch} = {word:#x}");
                }
            }
        }
    }
}

#[test]
fn cancelling_through_token_never_swaps() {
    let (width, height) = (8192, 4096);
    let mut life = engine(width, height, 1);
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let cells: Vec<_> = (0..200_000)
        .map(|_| (rng.random_range(0..(width * height) as i64), true))
        .collect();
    life.write_cells(cells);
    let before = life.population();
    assert!(before > 0);

    life.resume().unwrap();
    life.cancel_token().cancel();
    assert_eq!(life.await_generation(), Err(GridError::WorkersStopped));
    assert!(life.is_stopped());
    assert_eq!(life.generation(), 0);
    assert_eq!(life.population(), before);

    life.step().unwrap();
    assert_eq!(life.generation(), 1);
}
