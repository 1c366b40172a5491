//! Pool orchestration: ramp-up, steady state, and graceful shutdown of N
//! concurrent virtual users.
//!
//! # High-level flow
//! 1. [`VirtualUserPool::new`] validates the [`RunPlan`] up front — a plan
//!    with no selectable task or a non-positive user count/spawn rate is
//!    rejected before anything is spawned.
//! 2. [`VirtualUserPool::run`] spawns one Tokio task per user, paced at
//!    `spawn_rate_per_sec`, so load grows organically instead of slamming
//!    the target with a thundering herd.
//! 3. Users run independently until the run duration expires or a
//!    [`PoolHandle`] sends the stop signal, whichever comes first.
//! 4. Shutdown broadcasts the stop signal over a watch channel, then
//!    drains users with [`join_all`] under the grace-period timeout. Users
//!    that do not stop in time are aborted and reported as forced stops —
//!    termination is always bounded, never indefinite.
//!
//! # Tuning knobs
//! - `spawn_rate_per_sec`: ramp steepness. One user every `1/rate` seconds.
//! - `run_duration`: absent means run until stopped.
//! - `shutdown_grace_period`: how long a straggling user may finish its
//!   in-flight task before being aborted. Default 10s.
//! - `snapshot_interval`: when set, interim [`AggregateStats`] are
//!   published on a watch channel for live display.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::distr::weighted::WeightedIndex;
use serde::Serialize;
use tokio::sync::watch;
use typed_builder::TypedBuilder;

use crate::error::ConfigError;
use crate::metrics::{spawn_snapshot_publisher, AggregateStats, MetricsCollector};
use crate::task::{TaskRegistry, TaskScheduler};
use crate::transport::Transport;
use crate::user::{ActiveUsers, VirtualUser};
use crate::wait::WaitTimePolicy;

/// Immutable description of one load-test run. One plan drives one pool
/// lifecycle.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunPlan {
    /// How many users to reach at the top of the ramp.
    pub target_user_count: u32,
    /// Users spawned per second during ramp-up.
    #[builder(default = 1.0)]
    pub spawn_rate_per_sec: f64,
    /// Steady-state duration; `None` runs until stopped.
    #[builder(default, setter(strip_option))]
    pub run_duration: Option<Duration>,
    /// Base URL of the target service, consumed by whoever builds the
    /// transport. The engine itself never parses it.
    #[builder(default, setter(into))]
    pub host: String,
    #[builder(default = Duration::from_secs(10))]
    pub shutdown_grace_period: Duration,
    pub registry: Arc<TaskRegistry>,
    #[builder(default)]
    pub wait_policy: WaitTimePolicy,
    /// Interval for interim stats publication; `None` disables the stream.
    #[builder(default, setter(strip_option))]
    pub snapshot_interval: Option<Duration>,
}

/// Final outcome of a pool run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub stats: AggregateStats,
    pub elapsed: Duration,
    /// Users actually spawned (may be short of target when stopped during
    /// ramp-up).
    pub spawned_users: u32,
    /// Users that ignored the stop signal past the grace period and were
    /// aborted.
    pub forced_stops: u32,
}

/// Cheap cloneable handle for stopping a running pool from elsewhere.
///
/// `stop` is idempotent: repeated calls, or calls after the run has
/// already finished, are no-ops.
#[derive(Clone)]
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
}

impl PoolHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Orchestrates spawning, ramp-up, steady state, and shutdown of the
/// configured number of [`VirtualUser`]s.
pub struct VirtualUserPool {
    plan: RunPlan,
    transport: Arc<dyn Transport>,
    collector: Arc<MetricsCollector>,
    index: WeightedIndex<u64>,
    shutdown_tx: watch::Sender<bool>,
    snapshot_tx: watch::Sender<AggregateStats>,
    snapshot_rx: watch::Receiver<AggregateStats>,
    active: ActiveUsers,
}

impl VirtualUserPool {
    /// Validates the plan and prepares the pool. Fails with
    /// [`ConfigError`] before any user exists — a broken plan must never
    /// produce partial traffic.
    pub fn new(plan: RunPlan, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        if plan.target_user_count == 0 {
            return Err(ConfigError::NonPositiveUserCount);
        }
        if !plan.spawn_rate_per_sec.is_finite() || plan.spawn_rate_per_sec <= 0.0 {
            return Err(ConfigError::NonPositiveSpawnRate(plan.spawn_rate_per_sec));
        }
        let index = plan.registry.selection_index()?;

        let (shutdown_tx, _) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(AggregateStats::default());
        Ok(Self {
            plan,
            transport,
            collector: Arc::new(MetricsCollector::new()),
            index,
            shutdown_tx,
            snapshot_tx,
            snapshot_rx,
            active: ActiveUsers::new(),
        })
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shutdown: self.shutdown_tx.clone(),
        }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn active_users(&self) -> ActiveUsers {
        self.active.clone()
    }

    /// Receiver for interim stats when `snapshot_interval` is configured.
    /// The final aggregates are published here as well once the run ends.
    pub fn subscribe(&self) -> watch::Receiver<AggregateStats> {
        self.snapshot_rx.clone()
    }

    /// Runs the plan to completion and returns the final aggregates.
    ///
    /// Consumes the pool: one plan, one run. Obtain a [`PoolHandle`] (and
    /// any subscriptions) before calling.
    pub async fn run(self) -> RunReport {
        let VirtualUserPool {
            plan,
            transport,
            collector,
            index,
            shutdown_tx,
            snapshot_tx,
            snapshot_rx,
            active,
        } = self;

        let start = Instant::now();
        collector.arm();
        let deadline = plan
            .run_duration
            .map(|d| tokio::time::Instant::now() + d);

        let publisher = plan
            .snapshot_interval
            .map(|interval| spawn_snapshot_publisher(collector.clone(), interval, snapshot_tx.clone()));

        tracing::info!(
            target_users = plan.target_user_count,
            rate = plan.spawn_rate_per_sec,
            "Ramping up virtual users..."
        );
        let spawn_interval = Duration::from_secs_f64(1.0 / plan.spawn_rate_per_sec);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut handles = Vec::with_capacity(plan.target_user_count as usize);
        let mut abort_handles = Vec::with_capacity(plan.target_user_count as usize);
        let mut spawned: u32 = 0;
        let mut next_spawn = tokio::time::Instant::now();

        'ramp: for id in 0..plan.target_user_count {
            if *shutdown_rx.borrow() {
                break 'ramp;
            }
            let user = VirtualUser::new(
                u64::from(id),
                plan.registry.clone(),
                TaskScheduler::with_index(index.clone()),
                plan.wait_policy.clone(),
                transport.clone(),
                collector.clone(),
                shutdown_tx.subscribe(),
                active.clone(),
            );
            let handle = tokio::spawn(user.run());
            abort_handles.push(handle.abort_handle());
            handles.push(handle);
            spawned += 1;

            if spawned < plan.target_user_count {
                next_spawn += spawn_interval;
                tokio::select! {
                    _ = tokio::time::sleep_until(next_spawn) => {}
                    _ = shutdown_rx.wait_for(|stop| *stop) => break 'ramp,
                    _ = sleep_until_deadline(deadline) => {
                        tracing::info!("Run duration reached during ramp-up");
                        let _ = shutdown_tx.send(true);
                        break 'ramp;
                    }
                }
            }
        }
        tracing::info!(spawned, "Ramp-up complete");

        // Steady state: wait for duration expiry or an external stop.
        if !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    tracing::info!("Stop signal received");
                }
                _ = sleep_until_deadline(deadline) => {
                    tracing::info!("Run duration reached, signaling shutdown");
                }
            }
        }
        let _ = shutdown_tx.send(true);

        tracing::info!("Draining virtual users...");
        let forced_stops = match tokio::time::timeout(plan.shutdown_grace_period, join_all(handles))
            .await
        {
            Ok(_) => 0,
            Err(_) => {
                let leaked = active.get();
                tracing::warn!(leaked, "Grace period expired, aborting remaining users");
                for abort in &abort_handles {
                    abort.abort();
                }
                leaked
            }
        };

        if let Some(handle) = publisher {
            handle.abort();
        }
        collector.seal();
        let stats = collector.snapshot();
        let _ = snapshot_tx.send(stats.clone());
        drop(snapshot_rx);

        tracing::info!(
            samples = stats.count,
            startup_failures = stats.startup_failures,
            forced_stops,
            "Run complete"
        );
        RunReport {
            stats,
            elapsed: start.elapsed(),
            spawned_users: spawned,
            forced_stops,
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use crate::task::{task_fn, Outcome, TaskRegistry};
    use crate::transport::stub::StubTransport;
    use crate::transport::Transport;
    use crate::{task, FailureKind};

    async fn ok_task(_session: &mut SessionContext, _transport: &dyn Transport) -> Outcome {
        Outcome::Success
    }

    async fn failing_login(_session: &mut SessionContext, _transport: &dyn Transport) -> Outcome {
        Outcome::Failure(FailureKind::ConnectionError)
    }

    fn simple_plan(registry: TaskRegistry) -> RunPlan {
        RunPlan::builder()
            .target_user_count(2)
            .spawn_rate_per_sec(100.0)
            .run_duration(Duration::from_millis(200))
            .shutdown_grace_period(Duration::from_secs(2))
            .registry(Arc::new(registry))
            .build()
    }

    #[test]
    fn zero_weight_plan_is_rejected_before_spawn() {
        let registry = TaskRegistry::builder()
            .task("a", 0, task!(ok_task))
            .task("b", 0, task!(ok_task))
            .build();
        let transport = Arc::new(StubTransport::instant_ok());

        let err = VirtualUserPool::new(simple_plan(registry), transport.clone()).unwrap_err();
        assert_eq!(err, ConfigError::NoRunnableTasks);
        assert_eq!(transport.call_count(), 0, "nothing may run on rejection");
    }

    #[test]
    fn invalid_counts_are_rejected() {
        let registry = || TaskRegistry::builder().task("a", 1, task!(ok_task)).build();
        let transport = Arc::new(StubTransport::instant_ok());

        let plan = RunPlan::builder()
            .target_user_count(0)
            .registry(Arc::new(registry()))
            .build();
        assert_eq!(
            VirtualUserPool::new(plan, transport.clone()).unwrap_err(),
            ConfigError::NonPositiveUserCount
        );

        let plan = RunPlan::builder()
            .target_user_count(1)
            .spawn_rate_per_sec(0.0)
            .registry(Arc::new(registry()))
            .build();
        assert_eq!(
            VirtualUserPool::new(plan, transport).unwrap_err(),
            ConfigError::NonPositiveSpawnRate(0.0)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn end_to_end_weighted_run() {
        let registry = TaskRegistry::builder()
            .task("task_a", 1, task!(ok_task))
            .task("task_b", 3, task!(ok_task))
            .build();
        let plan = RunPlan::builder()
            .target_user_count(10)
            .spawn_rate_per_sec(10.0)
            .run_duration(Duration::from_secs(1))
            .shutdown_grace_period(Duration::from_secs(2))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();

        let report = pool.run().await;

        assert_eq!(report.spawned_users, 10);
        assert_eq!(report.forced_stops, 0);
        assert_eq!(report.stats.startup_failures, 0);
        assert_eq!(report.stats.success_count, report.stats.count);
        assert!(
            report.stats.count > 100,
            "ten users at ~1ms/iteration should produce ample samples, got {}",
            report.stats.count
        );

        let a = report.stats.per_task["task_a"].count as f64;
        let b = report.stats.per_task["task_b"].count as f64;
        let ratio = b / a;
        assert!(
            (2.0..=4.5).contains(&ratio),
            "taskB/taskA ratio {ratio} strayed from weight ratio 3"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ramp_up_paces_spawns_and_never_exceeds_target() {
        let registry = TaskRegistry::builder().task("t", 1, task!(ok_task)).build();
        let plan = RunPlan::builder()
            .target_user_count(4)
            .spawn_rate_per_sec(10.0)
            .wait_policy(WaitTimePolicy::Fixed(Duration::from_millis(10)))
            .shutdown_grace_period(Duration::from_secs(2))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();
        let handle = pool.handle();
        let active = pool.active_users();

        let run = tokio::spawn(pool.run());

        // One user every 100ms: partway through the ramp only some exist.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mid_ramp = active.get();
        assert!(
            (1..4).contains(&mid_ramp),
            "expected a partial ramp at 150ms, saw {mid_ramp}"
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(active.get(), 4, "ramp should be complete");

        handle.stop();
        let report = run.await.unwrap();
        assert_eq!(report.spawned_users, 4);
        assert!(active.get() <= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_idempotent_and_stats_stay_fixed() {
        let registry = TaskRegistry::builder().task("t", 1, task!(ok_task)).build();
        let pool =
            VirtualUserPool::new(simple_plan(registry), Arc::new(StubTransport::instant_ok()))
                .unwrap();
        let handle = pool.handle();
        let collector = pool.collector();

        let report = pool.run().await;

        handle.stop();
        let first = collector.snapshot();
        handle.stop();
        let second = collector.snapshot();

        assert_eq!(first, report.stats);
        assert_eq!(first, second, "stopping a stopped pool must change nothing");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_before_ramp_spawns_nothing_more() {
        let registry = TaskRegistry::builder().task("t", 1, task!(ok_task)).build();
        let plan = RunPlan::builder()
            .target_user_count(100)
            .spawn_rate_per_sec(5.0)
            .shutdown_grace_period(Duration::from_secs(1))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();
        let handle = pool.handle();

        let run = tokio::spawn(pool.run());
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.stop();
        let report = run.await.unwrap();

        // At 5 users/sec only the first couple of spawns fit in 250ms.
        assert!(
            report.spawned_users <= 3,
            "stop must cut the ramp short, spawned {}",
            report.spawned_users
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn grace_period_bounds_shutdown_and_reports_forced_stop() {
        let registry = TaskRegistry::builder()
            .task(
                "hang",
                1,
                task_fn(move |_session, _transport| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Outcome::Success
                    })
                }),
            )
            .build();
        let plan = RunPlan::builder()
            .target_user_count(1)
            .spawn_rate_per_sec(100.0)
            .run_duration(Duration::from_millis(100))
            .shutdown_grace_period(Duration::from_millis(300))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();

        let started = Instant::now();
        let report = pool.run().await;

        assert!(
            started.elapsed() < Duration::from_secs(2),
            "shutdown must be bounded by the grace period, took {:?}",
            started.elapsed()
        );
        assert_eq!(report.forced_stops, 1);
        assert_eq!(report.stats.count, 0, "the hung action never completed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_failures_surface_separately() {
        let registry = TaskRegistry::builder()
            .on_start("login", task!(failing_login))
            .task("t", 1, task!(ok_task))
            .build();
        let plan = RunPlan::builder()
            .target_user_count(3)
            .spawn_rate_per_sec(100.0)
            .run_duration(Duration::from_millis(200))
            .shutdown_grace_period(Duration::from_secs(1))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();

        let report = pool.run().await;

        assert_eq!(report.stats.startup_failures, 3);
        assert_eq!(report.stats.count, 0, "failed starters emit no samples");
        assert_eq!(report.forced_stops, 0);
        assert_eq!(report.stats.failure_counts["connection_error"], 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interim_snapshots_end_with_final_stats() {
        let registry = TaskRegistry::builder().task("t", 1, task!(ok_task)).build();
        let plan = RunPlan::builder()
            .target_user_count(2)
            .spawn_rate_per_sec(100.0)
            .run_duration(Duration::from_millis(300))
            .shutdown_grace_period(Duration::from_secs(1))
            .snapshot_interval(Duration::from_millis(50))
            .registry(Arc::new(registry))
            .build();
        let pool = VirtualUserPool::new(plan, Arc::new(StubTransport::instant_ok())).unwrap();
        let rx = pool.subscribe();

        let report = pool.run().await;

        assert_eq!(
            rx.borrow().count,
            report.stats.count,
            "final publication must match the report"
        );
    }
}
