// Metrics
//
// Counters, gauges and histograms for:
// - Execution outcomes by error class
// - Source screening rejections
// - Engine instance lifecycle (created, closed, active)
// - Step recording volume and degradation
// - Session latency

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{ErrorKind, ExecutionResult, ExecutionStatus, LimitKind};

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down, never below zero)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for interpreter sessions: sub-millisecond to the 30s ceiling
    pub fn new_latency() -> Self {
        let buckets = [0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 30.0]
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 1e-9)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, output: &mut String) {
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for bucket in &self.buckets {
            let _ = writeln!(
                output,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            output,
            "{}_bucket{{le=\"+Inf\"}} {}",
            name,
            self.get_count()
        );
        let _ = writeln!(
            output,
            "{}_sum {}",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        );
        let _ = writeln!(output, "{}_count {}", name, self.get_count());
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Execution outcomes
    pub executions_total: Counter,
    pub executions_completed: Counter,
    pub executions_syntax_error: Counter,
    pub executions_runtime_error: Counter,
    pub executions_policy_violation: Counter,
    pub executions_resource_limit: Counter,
    pub executions_rejected: Counter,

    // Limit violations
    pub limit_violations_wall_clock: Counter,
    pub limit_violations_output: Counter,
    pub limit_violations_memory: Counter,
    pub limit_violations_source: Counter,

    // Engine instance lifecycle
    pub instances_created: Counter,
    pub instances_closed: Counter,
    pub active_instances: Gauge,
    pub teardown_violations: Counter,

    // Step recording
    pub steps_recorded: Counter,
    pub step_caps_reached: Counter,
    pub hook_failures: Counter,

    // Latency
    pub execution_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_total: Counter::new(),
            executions_completed: Counter::new(),
            executions_syntax_error: Counter::new(),
            executions_runtime_error: Counter::new(),
            executions_policy_violation: Counter::new(),
            executions_resource_limit: Counter::new(),
            executions_rejected: Counter::new(),

            limit_violations_wall_clock: Counter::new(),
            limit_violations_output: Counter::new(),
            limit_violations_memory: Counter::new(),
            limit_violations_source: Counter::new(),

            instances_created: Counter::new(),
            instances_closed: Counter::new(),
            active_instances: Gauge::new(),
            teardown_violations: Counter::new(),

            steps_recorded: Counter::new(),
            step_caps_reached: Counter::new(),
            hook_failures: Counter::new(),

            execution_duration: Histogram::new_latency(),
        }
    }

    /// Record execution outcome
    pub fn record_execution(&self, result: &ExecutionResult) {
        self.executions_total.inc();
        self.execution_duration
            .observe(Duration::from_millis(result.elapsed_millis));

        if result.status == ExecutionStatus::Rejected {
            self.executions_rejected.inc();
        }

        let Some(error) = &result.error else {
            self.executions_completed.inc();
            return;
        };

        match error.kind {
            ErrorKind::SyntaxError => self.executions_syntax_error.inc(),
            ErrorKind::RuntimeError => self.executions_runtime_error.inc(),
            ErrorKind::PolicyViolation => self.executions_policy_violation.inc(),
            ErrorKind::ResourceLimitExceeded => self.executions_resource_limit.inc(),
            // Never the result's own error; tracked via hook_failures
            ErrorKind::InternalHookError => {}
        }

        if let Some(breach) = error.limit {
            self.record_limit_violation(breach.limit);
        }
    }

    pub fn record_limit_violation(&self, limit: LimitKind) {
        match limit {
            LimitKind::WallClock => self.limit_violations_wall_clock.inc(),
            LimitKind::OutputLines | LimitKind::OutputBytes => {
                self.limit_violations_output.inc()
            }
            LimitKind::Memory => self.limit_violations_memory.inc(),
            LimitKind::SourceBytes => self.limit_violations_source.inc(),
            LimitKind::Steps => self.step_caps_reached.inc(),
        }
    }

    pub fn record_instance_created(&self) {
        self.instances_created.inc();
        self.active_instances.inc();
    }

    pub fn record_instance_closed(&self) {
        self.instances_closed.inc();
        self.active_instances.dec();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# HELP luabox_executions_total Total number of executions");
        let _ = writeln!(output, "# TYPE luabox_executions_total counter");
        let _ = writeln!(output, "luabox_executions_total {}", self.executions_total.get());

        let _ = writeln!(output, "# HELP luabox_executions_by_outcome Executions by outcome");
        let _ = writeln!(output, "# TYPE luabox_executions_by_outcome counter");
        for (outcome, counter) in [
            ("completed", &self.executions_completed),
            ("syntax_error", &self.executions_syntax_error),
            ("runtime_error", &self.executions_runtime_error),
            ("policy_violation", &self.executions_policy_violation),
            ("resource_limit", &self.executions_resource_limit),
            ("rejected", &self.executions_rejected),
        ] {
            let _ = writeln!(
                output,
                "luabox_executions_by_outcome{{outcome=\"{}\"}} {}",
                outcome,
                counter.get()
            );
        }

        let _ = writeln!(output, "# HELP luabox_limit_violations_total Limit violations by limit");
        let _ = writeln!(output, "# TYPE luabox_limit_violations_total counter");
        for (limit, counter) in [
            ("wall_clock", &self.limit_violations_wall_clock),
            ("output", &self.limit_violations_output),
            ("memory", &self.limit_violations_memory),
            ("source", &self.limit_violations_source),
        ] {
            let _ = writeln!(
                output,
                "luabox_limit_violations_total{{limit=\"{}\"}} {}",
                limit,
                counter.get()
            );
        }

        let _ = writeln!(output, "# HELP luabox_instances_total Engine instance lifecycle events");
        let _ = writeln!(output, "# TYPE luabox_instances_total counter");
        let _ = writeln!(
            output,
            "luabox_instances_total{{event=\"created\"}} {}",
            self.instances_created.get()
        );
        let _ = writeln!(
            output,
            "luabox_instances_total{{event=\"closed\"}} {}",
            self.instances_closed.get()
        );

        let _ = writeln!(output, "# HELP luabox_active_instances Engine instances currently open");
        let _ = writeln!(output, "# TYPE luabox_active_instances gauge");
        let _ = writeln!(output, "luabox_active_instances {}", self.active_instances.get());

        let _ = writeln!(output, "# HELP luabox_steps_recorded_total Recorded execution steps");
        let _ = writeln!(output, "# TYPE luabox_steps_recorded_total counter");
        let _ = writeln!(output, "luabox_steps_recorded_total {}", self.steps_recorded.get());

        let _ = writeln!(output, "# HELP luabox_hook_failures_total Step hook introspection failures");
        let _ = writeln!(output, "# TYPE luabox_hook_failures_total counter");
        let _ = writeln!(output, "luabox_hook_failures_total {}", self.hook_failures.get());

        self.execution_duration.export(
            "luabox_execution_duration_seconds",
            "Session wall time",
            &mut output,
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ErrorInfo;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_gauge_saturates_at_zero() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new_latency();
        histogram.observe(Duration::from_micros(300));
        histogram.observe(Duration::from_millis(3));
        histogram.observe(Duration::from_secs(4));

        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_bucket_count(0.0005), 1);
        assert_eq!(histogram.get_bucket_count(0.005), 2);
        assert_eq!(histogram.get_bucket_count(5.0), 3);
    }

    #[test]
    fn test_record_execution_by_kind() {
        let registry = MetricsRegistry::new();

        registry.record_execution(&ExecutionResult::default());
        registry.record_execution(&ExecutionResult {
            status: ExecutionStatus::TimedOut,
            error: Some(ErrorInfo::resource_limit(LimitKind::WallClock, 2000)),
            elapsed_millis: 2001,
            ..ExecutionResult::default()
        });
        registry.record_execution(&ExecutionResult {
            status: ExecutionStatus::Rejected,
            error: Some(ErrorInfo::policy_violation()),
            ..ExecutionResult::default()
        });

        assert_eq!(registry.executions_total.get(), 3);
        assert_eq!(registry.executions_completed.get(), 1);
        assert_eq!(registry.executions_resource_limit.get(), 1);
        assert_eq!(registry.limit_violations_wall_clock.get(), 1);
        assert_eq!(registry.executions_policy_violation.get(), 1);
        assert_eq!(registry.executions_rejected.get(), 1);
    }

    #[test]
    fn test_instance_lifecycle() {
        let registry = MetricsRegistry::new();
        registry.record_instance_created();
        registry.record_instance_created();
        registry.record_instance_closed();
        assert_eq!(registry.active_instances.get(), 1);
        assert_eq!(registry.instances_closed.get(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let registry = MetricsRegistry::new();
        registry.record_execution(&ExecutionResult::default());

        let output = registry.export_prometheus();
        assert!(output.contains("luabox_executions_total 1"));
        assert!(output.contains("luabox_executions_by_outcome{outcome=\"completed\"} 1"));
        assert!(output.contains("luabox_execution_duration_seconds_count 1"));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn test_global_metrics() {
        let a = get_metrics();
        let b = get_metrics();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
