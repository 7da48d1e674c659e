use packed_life::packedlife::{Kernel, KernelBackend, Remainder};
use rand::RngCore;
use rand::SeedableRng;
use std::env;
use std::time::Instant;

#[derive(Clone, Debug)]
struct BenchConfig {
    words: usize,
    rounds: u64,
    seed: u64,
    json: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            words: 1 << 16,
            rounds: 200,
            seed: 0xA5A5_5EED_7788_1122,
            json: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RunResult {
    total_ms: f64,
    ns_per_word: f64,
    checksum: u64,
}

fn parse_args() -> BenchConfig {
    let mut cfg = BenchConfig::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--words" => {
                if let Some(v) = args.next() {
                    cfg.words = v.parse().expect("--words expects usize");
                }
            }
            "--rounds" => {
                if let Some(v) = args.next() {
                    cfg.rounds = v.parse().expect("--rounds expects u64");
                }
            }
            "--seed" => {
                if let Some(v) = args.next() {
                    cfg.seed = if let Some(hex) = v.strip_prefix("0x") {
                        u64::from_str_radix(hex, 16).expect("--seed hex parse failed")
                    } else {
                        v.parse().expect("--seed expects u64")
                    };
                }
            }
            "--json" => {
                cfg.json = true;
            }
            other => panic!("unknown arg: {other}"),
        }
    }
    cfg
}

/// Three rows of random words; each pass streams the middle row.
fn random_rows(cfg: &BenchConfig) -> [Vec<u32>; 3] {
    let mut rng = rand::rngs::StdRng::seed_from_u64(cfg.seed);
    let mut row = || (0..cfg.words).map(|_| rng.next_u32()).collect::<Vec<_>>();
    [row(), row(), row()]
}

fn run_backend(cfg: &BenchConfig, rows: &[Vec<u32>; 3], kernel: Kernel) -> RunResult {
    let [top, cur, bot] = rows;
    let mut checksum = 0u64;

    let start = Instant::now();
    for _ in 0..cfg.rounds {
        let mut remainder = Remainder::default();
        for i in 0..cfg.words {
            let (word, next) = kernel.step(top[i], cur[i], bot[i], remainder);
            remainder = next;
            checksum = checksum.wrapping_add(word as u64);
        }
    }
    let elapsed = start.elapsed();
    let total_ms = elapsed.as_secs_f64() * 1000.0;
    let ns_per_word = elapsed.as_nanos() as f64 / (cfg.words as f64 * cfg.rounds as f64);

    RunResult {
        total_ms,
        ns_per_word,
        checksum: std::hint::black_box(checksum),
    }
}

fn main() {
    let cfg = parse_args();
    let rows = random_rows(&cfg);
    let scalar = run_backend(&cfg, &rows, Kernel::new(KernelBackend::Scalar));
    let sse41 = KernelBackend::Sse41
        .is_available()
        .then(|| run_backend(&cfg, &rows, Kernel::new(KernelBackend::Sse41)));

    if let Some(sse) = sse41 {
        assert_eq!(scalar.checksum, sse.checksum, "backends disagree");
    }

    if cfg.json {
        let sse_json = match sse41 {
            Some(sse) => format!(
                "{{\"supported\":true,\"total_ms\":{:.6},\"ns_per_word\":{:.6},\"speedup\":{:.6}}}",
                sse.total_ms,
                sse.ns_per_word,
                scalar.ns_per_word / sse.ns_per_word
            ),
            None => "{\"supported\":false}".to_string(),
        };
        println!(
            "{{\"words\":{},\"rounds\":{},\"seed\":{},\"scalar\":{{\"total_ms\":{:.6},\"ns_per_word\":{:.6}}},\"sse41\":{}}}",
            cfg.words, cfg.rounds, cfg.seed, scalar.total_ms, scalar.ns_per_word, sse_json
        );
    } else {
        println!(
            "scalar: total_ms={:.6}, ns_per_word={:.4}, checksum={:#x}",
            scalar.total_ms, scalar.ns_per_word, scalar.checksum
        );
        match sse41 {
            Some(sse) => println!(
                "sse41: total_ms={:.6}, ns_per_word={:.4}, speedup={:.3}x",
                sse.total_ms,
                sse.ns_per_word,
                scalar.ns_per_word / sse.ns_per_word
            ),
            None => println!("sse41: unsupported"),
        }
    }
}
