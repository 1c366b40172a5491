//! Reports and Reporters: turning a finished run into output.
//!
//! The engine only guarantees the data in [`RunReport`]. A report type
//! derives a presentation from it; a [`Reporter`] sends that somewhere
//! (stdout here, a file or a dashboard in your own impl).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metrics::TaskStats;
use crate::pool::RunReport;

/// Machine-friendly rendering of a run, flattened for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonReport {
    pub count: u64,
    pub success_count: u64,
    pub failure_counts: BTreeMap<String, u64>,
    pub startup_failures: u64,
    pub forced_stops: u32,
    pub spawned_users: u32,
    pub elapsed_secs: f64,
    pub throughput_per_sec: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub per_task: BTreeMap<String, TaskStats>,
}

impl From<&RunReport> for JsonReport {
    fn from(report: &RunReport) -> Self {
        let stats = &report.stats;
        Self {
            count: stats.count,
            success_count: stats.success_count,
            failure_counts: stats.failure_counts.clone(),
            startup_failures: stats.startup_failures,
            forced_stops: report.forced_stops,
            spawned_users: report.spawned_users,
            elapsed_secs: report.elapsed.as_secs_f64(),
            throughput_per_sec: stats.throughput_per_sec,
            p50_ms: stats.p50.as_secs_f64() * 1_000.0,
            p95_ms: stats.p95.as_secs_f64() * 1_000.0,
            p99_ms: stats.p99.as_secs_f64() * 1_000.0,
            per_task: stats.per_task.clone(),
        }
    }
}

/// Human-friendly rendering of a run.
#[derive(Debug)]
pub struct TextReport {
    report: RunReport,
}

impl From<&RunReport> for TextReport {
    fn from(report: &RunReport) -> Self {
        Self {
            report: report.clone(),
        }
    }
}

impl fmt::Display for TextReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.report.stats;
        let success_pct = if stats.count > 0 {
            stats.success_count as f64 / stats.count as f64 * 100.0
        } else {
            0.0
        };
        writeln!(
            f,
            "{} samples in {:.1}s ({:.1}/s), {:.1}% success",
            stats.count,
            self.report.elapsed.as_secs_f64(),
            stats.throughput_per_sec,
            success_pct,
        )?;
        writeln!(
            f,
            "latency p50 {:?}  p95 {:?}  p99 {:?}",
            stats.p50, stats.p95, stats.p99
        )?;
        writeln!(
            f,
            "users: {} spawned, {} startup failures, {} forced stops",
            self.report.spawned_users, stats.startup_failures, self.report.forced_stops
        )?;
        if !stats.failure_counts.is_empty() {
            write!(f, "failures:")?;
            for (kind, count) in &stats.failure_counts {
                write!(f, " {kind}={count}")?;
            }
            writeln!(f)?;
        }
        for (name, task) in &stats.per_task {
            writeln!(
                f,
                "  {name}: {} runs ({} ok, {} failed)",
                task.count, task.success_count, task.fail_count
            )?;
        }
        Ok(())
    }
}

/// Consumes reports and sends them somewhere.
#[async_trait]
pub trait Reporter<R: Send + 'static> {
    async fn report(&self, report: R) -> Result<(), Box<dyn std::error::Error>>;
}

pub struct StdoutReporter;

#[async_trait]
impl Reporter<TextReport> for StdoutReporter {
    async fn report(&self, report: TextReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{report}");
        Ok(())
    }
}

#[async_trait]
impl Reporter<JsonReport> for StdoutReporter {
    async fn report(&self, report: JsonReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AggregateStats;
    use std::time::Duration;

    fn fixture() -> RunReport {
        let mut stats = AggregateStats {
            count: 40,
            success_count: 37,
            startup_failures: 1,
            p50: Duration::from_millis(12),
            p95: Duration::from_millis(80),
            p99: Duration::from_millis(95),
            throughput_per_sec: 13.3,
            ..AggregateStats::default()
        };
        stats.failure_counts.insert("timeout".into(), 3);
        stats.per_task.insert(
            "create_address".into(),
            TaskStats {
                count: 40,
                success_count: 37,
                fail_count: 3,
            },
        );
        RunReport {
            stats,
            elapsed: Duration::from_secs(3),
            spawned_users: 5,
            forced_stops: 1,
        }
    }

    #[test]
    fn json_report_flattens_the_run() {
        let report = JsonReport::from(&fixture());
        assert_eq!(report.count, 40);
        assert_eq!(report.p50_ms, 12.0);
        assert_eq!(report.forced_stops, 1);
        assert_eq!(report.failure_counts["timeout"], 3);

        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("\"create_address\""));
    }

    #[test]
    fn text_report_mentions_the_diagnostics() {
        let rendered = TextReport::from(&fixture()).to_string();
        assert!(rendered.contains("40 samples"));
        assert!(rendered.contains("1 startup failures"));
        assert!(rendered.contains("1 forced stops"));
        assert!(rendered.contains("timeout=3"));
        assert!(rendered.contains("create_address"));
    }
}
