// Cold-start benchmark for snippet execution
// Measures end-to-end latency from CLI invocation to a reported outcome, plus
// the in-process cost of the filter and interpreter alone.
// Target: p50 < 100ms, p95 < 200ms for a hello-world snippet

use snipbox::restricted::{run_snippet, Limits};
use snipbox::StaticFilter;
use std::process::Command;
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 100;
const WARMUP_ITERATIONS: usize = 10;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

/// Benchmark result
struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    budget: Option<(Duration, Duration)>,
}

impl BenchmarkResult {
    fn passed(&self) -> bool {
        match self.budget {
            Some((p50, p95)) => self.stats.p50 < p50 && self.stats.p95 < p95,
            None => true,
        }
    }

    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        match self.budget {
            _ if self.passed() => println!("PASS"),
            Some((p50, p95)) => println!(
                "FAIL: p50={:?} (target <{:?}), p95={:?} (target <{:?})",
                self.stats.p50, p50, self.stats.p95, p95
            ),
            None => {}
        }
    }
}

fn sample<F: FnMut()>(mut run: F) -> Vec<Duration> {
    for _ in 0..WARMUP_ITERATIONS {
        run();
    }
    (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            run();
            start.elapsed()
        })
        .collect()
}

/// Full CLI round trip: supervisor, worker spawn, interpreter, report.
fn benchmark_cli_hello_world() -> BenchmarkResult {
    let binary = env!("CARGO_BIN_EXE_snipbox");
    let samples = sample(|| {
        let _ = Command::new(binary)
            .args(["exec", "--deadline", "5", r#"print("Hello, World!")"#])
            .output();
    });

    BenchmarkResult {
        scenario: "CLI exec hello world".to_string(),
        stats: LatencyStats::from_samples(samples),
        budget: Some((Duration::from_millis(100), Duration::from_millis(200))),
    }
}

/// Filter plus interpreter without any process boundary.
fn benchmark_in_process_fibonacci() -> BenchmarkResult {
    let filter = StaticFilter::standard();
    let limits = Limits::default();
    let code = "a, b = 0, 1\nfor _ in range(30):\n    print(a)\n    a, b = b, a + b\n";
    let samples = sample(|| {
        if !filter.check(code).blocked {
            let _ = run_snippet(code, &limits);
        }
    });

    BenchmarkResult {
        scenario: "In-process fibonacci".to_string(),
        stats: LatencyStats::from_samples(samples),
        budget: Some((Duration::from_millis(5), Duration::from_millis(20))),
    }
}

fn main() {
    println!("=== snipbox Cold-Start Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let results = vec![benchmark_cli_hello_world(), benchmark_in_process_fibonacci()];

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.passed()).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);

    if passed_count == total_count {
        println!("All cold-start budgets met");
        std::process::exit(0);
    } else {
        println!("Some cold-start budgets exceeded");
        std::process::exit(1);
    }
}
