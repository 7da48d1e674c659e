#[cfg(feature = "mimalloc-global")]
#[global_allocator]
static GLOBAL_ALLOCATOR: mimalloc::MiMalloc = mimalloc::MiMalloc;

use packed_life::packedlife::{KernelBackend, NullSink, PackedLife, PackedLifeConfig};
use rand::RngCore;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LIVE_DENSITY: f64 = 0.42;
const CHECK_INTERVAL: u64 = 100;
/// Grids up to this many cells are cross-checked against a naive step.
const CHECK_MAX_CELLS: usize = 1 << 20;

struct MainArgs {
    width: usize,
    height: usize,
    generations: u64,
    config: PackedLifeConfig,
}

fn parse_args() -> MainArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = MainArgs {
        width: 4096,
        height: 4096,
        generations: 1000,
        config: PackedLifeConfig::default(),
    };
    let next_arg = |i: usize, flag: &str| -> &str {
        args.get(i)
            .map(String::as_str)
            .unwrap_or_else(|| panic!("{flag} requires a value"))
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--width" => {
                i += 1;
                parsed.width = next_arg(i, "--width")
                    .parse()
                    .expect("--width requires a positive integer");
            }
            "--height" => {
                i += 1;
                parsed.height = next_arg(i, "--height")
                    .parse()
                    .expect("--height requires a positive integer");
            }
            "--generations" => {
                i += 1;
                parsed.generations = next_arg(i, "--generations")
                    .parse()
                    .expect("--generations requires a non-negative integer");
            }
            "--threads" => {
                i += 1;
                let n: usize = next_arg(i, "--threads")
                    .parse()
                    .expect("--threads requires a positive integer");
                parsed.config = parsed.config.task_count(n);
            }
            "--kernel" => {
                i += 1;
                let backend = match next_arg(i, "--kernel").to_ascii_lowercase().as_str() {
                    "scalar" => KernelBackend::Scalar,
                    "sse41" | "sse4.1" => KernelBackend::Sse41,
                    other => panic!("unknown kernel backend: {other} (expected scalar or sse41)"),
                };
                parsed.config = parsed.config.kernel(backend);
            }
            other => panic!(
                "unknown argument: {other}\nusage: packed-life [--width N] [--height N] [--generations N] [--threads N] [--kernel scalar|sse41]"
            ),
        }
        i += 1;
    }
    parsed
}

fn seed_random_world(width: usize, height: usize) -> Vec<bool> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED_1234_ABCD_EF01);
    let threshold = (u64::MAX as f64 * LIVE_DENSITY) as u64;
    (0..width * height)
        .map(|_| rng.next_u64() <= threshold)
        .collect()
}

fn naive_step(cells: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = vec![false; cells.len()];
    for y in 0..height {
        for x in 0..width {
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = (x as i64 + dx).rem_euclid(width as i64) as usize;
                    let ny = (y as i64 + dy).rem_euclid(height as i64) as usize;
                    if (dx, dy) != (0, 0) && cells[ny * width + nx] {
                        n += 1;
                    }
                }
            }
            let alive = cells[y * width + x];
            out[y * width + x] = n == 3 || (alive && n == 2);
        }
    }
    out
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let (width, height) = (args.width, args.height);
    let mut engine = match PackedLife::new(width, height, args.config, Arc::new(NullSink)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("packed-life: {e}");
            std::process::exit(2);
        }
    };

    let mut reference = seed_random_world(width, height);
    engine.write_cells(
        reference
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(i, _)| (i as i64, true)),
    );
    let check = width * height <= CHECK_MAX_CELLS;

    println!(
        "{width}x{height}, {} tasks, kernel {:?}, edge cells embedded: {}",
        engine.task_count(),
        engine.kernel_backend(),
        engine.edge_cells_optimization()
    );

    let mut total = Duration::ZERO;
    let mut done = 0;
    while done < args.generations {
        let chunk = CHECK_INTERVAL.min(args.generations - done);
        let start = Instant::now();
        if let Err(e) = engine.step_n(chunk) {
            eprintln!("packed-life: {e}");
            std::process::exit(1);
        }
        let phase = start.elapsed();
        total += phase;
        done += chunk;

        let population = engine.population();
        let ms = phase.as_secs_f64() * 1000.0;
        let avg_ms = ms / chunk as f64;
        if check {
            for _ in 0..chunk {
                reference = naive_step(&reference, width, height);
            }
            let expected = reference.iter().filter(|&&alive| alive).count() as u64;
            let status = if expected == population {
                "MATCH"
            } else {
                "MISMATCH"
            };
            println!("Generation {done}: pop = {population}, naive pop = {expected} [{status}]");
        } else {
            println!("Generation {done}: pop = {population}");
        }
        println!("  {ms:.3} ms total, {avg_ms:.6} ms/gen");
    }

    let total_ms = total.as_secs_f64() * 1000.0;
    let avg_ms = total_ms / args.generations.max(1) as f64;
    let cells_per_sec = (width * height) as f64 * args.generations as f64 / total.as_secs_f64();
    println!("\n--- Summary ({} generations) ---", args.generations);
    println!("{total_ms:.3} ms total, {avg_ms:.6} ms/gen, {cells_per_sec:.3e} cells/s");
}
