// In-process metrics.
//
// Counters for execution outcomes, worker spawns and limit violations, a
// gauge of executions in flight, and a latency histogram. Exportable in the
// Prometheus text format; the CLI writes the export with `--metrics-file`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::OutcomeKind;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
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

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero rather than wrapping.
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
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
    /// Create histogram with standard latency buckets (in seconds)
    pub fn new_latency() -> Self {
        let bucket_bounds = [
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ];

        let buckets = bucket_bounds
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
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
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
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Execution outcome counters
    pub executions_total: Counter,
    pub executions_ok: Counter,
    pub executions_blocked: Counter,
    pub executions_re: Counter,
    pub executions_tle: Counter,
    pub executions_crash: Counter,
    pub executions_launch: Counter,

    // Worker lifecycle
    pub workers_spawned: Counter,
    pub forced_kills: Counter,

    // Resource limit violation counters
    pub limit_violations_wall: Counter,
    pub limit_violations_output: Counter,

    pub active_executions: Gauge,

    pub execution_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_total: Counter::new(),
            executions_ok: Counter::new(),
            executions_blocked: Counter::new(),
            executions_re: Counter::new(),
            executions_tle: Counter::new(),
            executions_crash: Counter::new(),
            executions_launch: Counter::new(),

            workers_spawned: Counter::new(),
            forced_kills: Counter::new(),

            limit_violations_wall: Counter::new(),
            limit_violations_output: Counter::new(),

            active_executions: Gauge::new(),

            execution_duration: Histogram::new_latency(),
        }
    }

    /// Record execution outcome
    pub fn record_outcome(&self, kind: OutcomeKind, wall_time: Duration) {
        self.executions_total.inc();
        self.execution_duration.observe(wall_time);

        match kind {
            OutcomeKind::Completed => self.executions_ok.inc(),
            OutcomeKind::Blocked => self.executions_blocked.inc(),
            OutcomeKind::RuntimeFault => self.executions_re.inc(),
            OutcomeKind::Timeout => {
                self.executions_tle.inc();
                self.limit_violations_wall.inc();
            }
            OutcomeKind::CrashNoResult => self.executions_crash.inc(),
            OutcomeKind::LaunchFailure => self.executions_launch.inc(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP snipbox_executions_total Total number of executions\n");
        output.push_str("# TYPE snipbox_executions_total counter\n");
        output.push_str(&format!(
            "snipbox_executions_total {}\n",
            self.executions_total.get()
        ));

        output.push_str("# HELP snipbox_executions_by_outcome Executions by outcome\n");
        output.push_str("# TYPE snipbox_executions_by_outcome counter\n");
        for (label, counter) in [
            ("OK", &self.executions_ok),
            ("BLOCKED", &self.executions_blocked),
            ("RE", &self.executions_re),
            ("TLE", &self.executions_tle),
            ("CRASH", &self.executions_crash),
            ("LAUNCH", &self.executions_launch),
        ] {
            output.push_str(&format!(
                "snipbox_executions_by_outcome{{outcome=\"{}\"}} {}\n",
                label,
                counter.get()
            ));
        }

        output.push_str("# HELP snipbox_workers_spawned_total Worker processes spawned\n");
        output.push_str("# TYPE snipbox_workers_spawned_total counter\n");
        output.push_str(&format!(
            "snipbox_workers_spawned_total {}\n",
            self.workers_spawned.get()
        ));

        output.push_str("# HELP snipbox_forced_kills_total Workers killed at the deadline\n");
        output.push_str("# TYPE snipbox_forced_kills_total counter\n");
        output.push_str(&format!(
            "snipbox_forced_kills_total {}\n",
            self.forced_kills.get()
        ));

        output.push_str("# HELP snipbox_limit_violations_total Limit violations\n");
        output.push_str("# TYPE snipbox_limit_violations_total counter\n");
        output.push_str(&format!(
            "snipbox_limit_violations_total{{limit=\"wall\"}} {}\n",
            self.limit_violations_wall.get()
        ));
        output.push_str(&format!(
            "snipbox_limit_violations_total{{limit=\"output\"}} {}\n",
            self.limit_violations_output.get()
        ));

        output.push_str("# HELP snipbox_active_executions Currently active executions\n");
        output.push_str("# TYPE snipbox_active_executions gauge\n");
        output.push_str(&format!(
            "snipbox_active_executions {}\n",
            self.active_executions.get()
        ));

        output.push_str("# HELP snipbox_execution_duration_seconds Execution wall time\n");
        output.push_str("# TYPE snipbox_execution_duration_seconds histogram\n");
        for bucket in &self.execution_duration.buckets {
            output.push_str(&format!(
                "snipbox_execution_duration_seconds_bucket{{le=\"{}\"}} {}\n",
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "snipbox_execution_duration_seconds_sum {}\n",
            self.execution_duration.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "snipbox_execution_duration_seconds_count {}\n",
            self.execution_duration.get_count()
        ));

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

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);

        counter.reset();
        assert_eq!(counter.get(), 0);
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

        histogram.observe(Duration::from_millis(50));
        histogram.observe(Duration::from_millis(150));
        histogram.observe(Duration::from_millis(1200));

        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_bucket_count(0.05), 1);
        assert_eq!(histogram.get_bucket_count(0.25), 2);
        assert_eq!(histogram.get_bucket_count(2.5), 3);
        assert_eq!(histogram.get_sum_micros(), 1_400_000);
    }

    #[test]
    fn test_record_outcome() {
        let metrics = MetricsRegistry::new();

        metrics.record_outcome(OutcomeKind::Completed, Duration::from_millis(20));
        metrics.record_outcome(OutcomeKind::Timeout, Duration::from_secs(1));
        metrics.record_outcome(OutcomeKind::Blocked, Duration::ZERO);

        assert_eq!(metrics.executions_total.get(), 3);
        assert_eq!(metrics.executions_ok.get(), 1);
        assert_eq!(metrics.executions_tle.get(), 1);
        assert_eq!(metrics.limit_violations_wall.get(), 1);
        assert_eq!(metrics.executions_blocked.get(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();

        metrics.record_outcome(OutcomeKind::Completed, Duration::from_millis(20));
        metrics.record_outcome(OutcomeKind::CrashNoResult, Duration::from_millis(20));
        metrics.workers_spawned.add(2);

        let output = metrics.export_prometheus();

        assert!(output.contains("snipbox_executions_total 2"));
        assert!(output.contains("snipbox_executions_by_outcome{outcome=\"OK\"} 1"));
        assert!(output.contains("snipbox_executions_by_outcome{outcome=\"CRASH\"} 1"));
        assert!(output.contains("snipbox_workers_spawned_total 2"));
        assert!(output.contains("snipbox_execution_duration_seconds_count 2"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();
        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
