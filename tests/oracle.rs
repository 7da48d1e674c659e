//! Generation-by-generation comparison against a naive toroidal stepper.

use std::sync::Arc;

use packed_life::packedlife::{NullSink, PackedLife, PackedLifeConfig};
use rand::Rng;
use rand::SeedableRng;

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

fn snapshot(engine: &PackedLife) -> Vec<bool> {
    (0..engine.width() * engine.height())
        .map(|i| engine.read_cell(i as i64))
        .collect()
}

fn run_against_oracle(cells: Vec<bool>, width: usize, height: usize, tasks: usize, generations: u64) {
    let mut life = PackedLife::new(
        width,
        height,
        PackedLifeConfig::default().task_count(tasks),
        Arc::new(NullSink),
    )
    .unwrap();
    life.write_cells(
        cells
            .iter()
            .enumerate()
            .map(|(i, &alive)| (i as i64, alive)),
    );

    let mut reference = cells;
    for generation in 1..=generations {
        life.step().unwrap();
        reference = step_naive(&reference, width, height);
        assert_eq!(
            snapshot(&life),
            reference,
            "{width}x{height} tasks={tasks} generation={generation}"
        );
    }
}

#[test]
fn glider_on_ten_by_ten_single_worker() {
    let mut cells = vec![false; 100];
    for (x, y) in [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)] {
        cells[y * 10 + x] = true;
    }
    run_against_oracle(cells, 10, 10, 1, 60);
}

#[test]
fn glider_on_ten_by_ten_three_workers() {
    let mut cells = vec![false; 100];
    for (x, y) in [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)] {
        cells[y * 10 + x] = true;
    }
    run_against_oracle(cells, 10, 10, 3, 60);
}

#[test]
fn random_worlds_across_width_classes() {
    // Embedded wraparound, one spare bit, and whole-word rows, plus tiny
    // widths where a single word wraps onto itself.
    let widths = [
        1usize, 2, 3, 5, 29, 30, 31, 32, 33, 34, 62, 63, 64, 65, 66, 95, 96, 97, 128,
    ];
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x0A0C_1E5E);
    for width in widths {
        for height in [1usize, 2, 3, 9] {
            for tasks in [1usize, 3] {
                let cells = (0..width * height)
                    .map(|_| rng.random::<f64>() < 0.4)
                    .collect();
                run_against_oracle(cells, width, height, tasks, 8);
            }
        }
    }
}
