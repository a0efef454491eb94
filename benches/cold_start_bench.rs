// Cold-start benchmark for per-request sessions
// Measures end-to-end latency of one request: screen, fresh engine instance,
// environment build, run, teardown.
// Target: direct p50 < 5ms, stepwise p50 < 20ms for small scripts

use luabox::{Policy, ScriptExecutor};
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

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
    passed: bool,
    reason: Option<String>,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        match &self.reason {
            None => println!("PASS"),
            Some(reason) => println!("FAIL: {}", reason),
        }
    }
}

fn measure(mut run_once: impl FnMut()) -> LatencyStats {
    for _ in 0..WARMUP_ITERATIONS {
        run_once();
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        run_once();
        samples.push(start.elapsed());
    }
    LatencyStats::from_samples(samples)
}

fn judge(scenario: &str, stats: LatencyStats, p50_budget: Duration) -> BenchmarkResult {
    let passed = stats.p50 < p50_budget;
    let reason = if passed {
        None
    } else {
        Some(format!("p50={:?} (target <{:?})", stats.p50, p50_budget))
    };
    BenchmarkResult {
        scenario: scenario.to_string(),
        stats,
        passed,
        reason,
    }
}

/// Direct run of a one-line script
fn benchmark_direct_hello_world(executor: &ScriptExecutor) -> BenchmarkResult {
    let code = r#"print("Hello, World!")"#;
    let stats = measure(|| {
        let _ = executor.execute(code);
    });
    judge("Direct Hello World", stats, Duration::from_millis(5))
}

/// Stepwise run of a short loop with a function call
fn benchmark_stepwise_loop(executor: &ScriptExecutor) -> BenchmarkResult {
    let code = r#"
local function square(n)
  return n * n
end
local total = 0
for i = 1, 20 do
  total = total + square(i)
end
print(total)
"#;
    let stats = measure(|| {
        let _ = executor.execute_stepwise(code);
    });
    judge("Stepwise Loop", stats, Duration::from_millis(20))
}

fn main() {
    println!("=== luabox Cold-Start Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let executor = match ScriptExecutor::new(Policy::default()) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("failed to build executor: {}", e);
            std::process::exit(1);
        }
    };

    let results = vec![
        benchmark_direct_hello_world(&executor),
        benchmark_stepwise_loop(&executor),
    ];

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);
    println!(
        "Teardown ledger balanced: {}",
        executor.ledger().is_balanced()
    );

    if passed_count == total_count {
        println!("All cold-start budgets met");
        std::process::exit(0);
    } else {
        println!("Some cold-start budgets exceeded");
        std::process::exit(1);
    }
}
