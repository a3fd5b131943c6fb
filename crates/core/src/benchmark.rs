//! Synthetic throughput benchmark.
//!
//! The worker runs this once at startup and reports the iteration count
//! as its `ops` score. The score is only meaningful relative to other
//! workers running the same workload for the same duration.

use std::hint::black_box;
use std::time::{Duration, Instant};

/// Iterations between clock reads.
const CLOCK_CHECK_EVERY: u64 = 64;

/// Run the distance workload for `duration` and return the number of
/// completed iterations.
///
/// Blocks the calling thread for the whole duration.
pub fn run_ops_benchmark(duration: Duration) -> u64 {
    let start = Instant::now();
    let mut rng = XorShift::new(0x9E37_79B9_7F4A_7C15);
    let mut ops: u64 = 0;
    let mut acc = 0.0f64;

    loop {
        let (x1, y1, x2, y2) = (rng.next_f64(), rng.next_f64(), rng.next_f64(), rng.next_f64());
        acc += distance(x1, y1, x2, y2);
        ops += 1;

        if ops % CLOCK_CHECK_EVERY == 0 && start.elapsed() >= duration {
            break;
        }
    }

    black_box(acc);
    ops
}

fn distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let (dx, dy) = (x2 - x1, y2 - y1);
    black_box((dx * dx + dy * dy).sqrt())
}

/// Minimal xorshift64 generator; only needs to defeat constant folding.
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_f64(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}
