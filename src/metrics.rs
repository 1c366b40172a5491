//! Sample collection and aggregate statistics.
//!
//! Every task execution produces one [`ExecutionSample`], success or not,
//! and hands it to the shared [`MetricsCollector`]. The collector is the
//! only mutable state that crosses user boundaries, so its contract is
//! strict: `record` must be safe from any number of concurrent users and
//! must hold its lock only for a handful of counter and histogram updates,
//! and `snapshot` must return a consistent view while records keep landing.
//!
//! # Aggregation strategy
//!
//! Latencies go into an HDR histogram (3 significant figures, microsecond
//! resolution, one hour ceiling), counts into per-task and per-failure-kind
//! tables. [`AggregateStats`] is derived on demand from that state — never
//! patched incrementally — so a snapshot can miss samples recorded after
//! the call but can never double-count or expose a half-written sample.
//!
//! Startup failures are a separate counter, not samples: a user that could
//! not authenticate must not look like steady-state traffic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::task::{FailureKind, Outcome};

/// One recorded outcome/latency measurement for a single task execution.
///
/// Immutable once created; ownership transfers to the collector.
#[derive(Debug, Clone)]
pub struct ExecutionSample {
    pub task_name: String,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Per-task slice of the aggregate view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub count: u64,
    pub success_count: u64,
    pub fail_count: u64,
}

/// Summary statistics derived from the full sample stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub count: u64,
    pub success_count: u64,
    /// Failure counts keyed by kind label (`timeout`, `server_error_500`, ...).
    pub failure_counts: BTreeMap<String, u64>,
    /// Users whose on-start task failed. Counted apart from samples so auth
    /// problems are distinguishable from steady-state traffic problems.
    pub startup_failures: u64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    /// Samples per second over the run window.
    pub throughput_per_sec: f64,
    pub per_task: BTreeMap<String, TaskStats>,
}

struct CollectorInner {
    histogram: Histogram<u64>,
    count: u64,
    success_count: u64,
    failure_counts: BTreeMap<String, u64>,
    startup_failures: u64,
    per_task: BTreeMap<String, TaskStats>,
    window_start: Instant,
    window_end: Option<Instant>,
}

/// Thread-safe sink for execution samples, shared by every virtual user.
pub struct MetricsCollector {
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CollectorInner {
                // Microsecond resolution up to one hour covers any task
                // action the per-call transport timeout would let live.
                histogram: Histogram::new_with_bounds(1, 3_600_000_000, 3)
                    .expect("static histogram bounds"),
                count: 0,
                success_count: 0,
                failure_counts: BTreeMap::new(),
                startup_failures: 0,
                per_task: BTreeMap::new(),
                window_start: Instant::now(),
                window_end: None,
            }),
        }
    }

    /// Restarts the throughput window. Called once when a run begins so the
    /// gap between plan construction and ramp-up start does not dilute the
    /// rate.
    pub(crate) fn arm(&self) {
        let mut inner = self.inner.lock();
        inner.window_start = Instant::now();
        inner.window_end = None;
    }

    /// Freezes the throughput window at run end, so every later snapshot
    /// reports the same rate instead of one that decays with wall time.
    /// Idempotent.
    pub(crate) fn seal(&self) {
        let mut inner = self.inner.lock();
        if inner.window_end.is_none() {
            inner.window_end = Some(Instant::now());
        }
    }

    /// Records one sample. Lock hold time is a histogram insert plus a few
    /// counter bumps; callers never observe more than that.
    pub fn record(&self, sample: ExecutionSample) {
        let micros = sample.duration.as_micros().min(u128::from(u64::MAX)) as u64;
        let mut inner = self.inner.lock();
        inner.histogram.saturating_record(micros.max(1));
        inner.count += 1;

        match sample.outcome {
            Outcome::Success => {
                inner.success_count += 1;
                let task = inner.per_task.entry(sample.task_name).or_default();
                task.count += 1;
                task.success_count += 1;
            }
            Outcome::Failure(kind) => {
                *inner.failure_counts.entry(kind.to_string()).or_default() += 1;
                let task = inner.per_task.entry(sample.task_name).or_default();
                task.count += 1;
                task.fail_count += 1;
            }
        }
    }

    /// Records a user that failed its on-start task and never entered
    /// steady state.
    pub fn record_startup_failure(&self, kind: FailureKind) {
        let mut inner = self.inner.lock();
        inner.startup_failures += 1;
        *inner.failure_counts.entry(kind.to_string()).or_default() += 1;
    }

    /// Derives the current aggregate view. Safe to call concurrently with
    /// ongoing `record`s; the result is point-in-time consistent.
    pub fn snapshot(&self) -> AggregateStats {
        let inner = self.inner.lock();
        let quantile = |q: f64| {
            if inner.count == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(inner.histogram.value_at_quantile(q))
            }
        };
        let window_end = inner.window_end.unwrap_or_else(Instant::now);
        let elapsed = window_end
            .saturating_duration_since(inner.window_start)
            .as_secs_f64();
        AggregateStats {
            count: inner.count,
            success_count: inner.success_count,
            failure_counts: inner.failure_counts.clone(),
            startup_failures: inner.startup_failures,
            p50: quantile(0.50),
            p95: quantile(0.95),
            p99: quantile(0.99),
            throughput_per_sec: if elapsed > 0.0 {
                inner.count as f64 / elapsed
            } else {
                0.0
            },
            per_task: inner.per_task.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes interim snapshots into a watch channel at a fixed interval,
/// for live display by whatever consumes the receiver.
pub(crate) fn spawn_snapshot_publisher(
    collector: Arc<MetricsCollector>,
    interval: Duration,
    tx: watch::Sender<AggregateStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if tx.send(collector.snapshot()).is_err() {
                break;
            }
        }
    })
}
