//! Stampede — a virtual-user load-generation engine for Rust.
//!
//! Stampede simulates many concurrent "virtual users", each repeatedly
//! selecting and executing one of a set of weighted tasks against a target
//! service while maintaining per-user session state (an auth token obtained
//! at startup) and recording timing/outcome metrics for every call. It is
//! shaped by tools such as Locust, Goose, and K6, but owns only the
//! engine: concurrency, scheduling, session lifecycle, and aggregation.
//! The requests themselves are scenario data you supply.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`TaskRegistry`]: an immutable table of named, weighted tasks plus an
//!   optional on-start task run once per user (typically login).
//! - [`TaskScheduler`]: weighted random selection of a user's next task.
//! - [`WaitTimePolicy`]: the pause between a user's consecutive
//!   executions — fixed, uniform-random, or a custom distribution.
//! - [`SessionContext`]: per-user state (auth token, scenario attributes),
//!   exclusively owned by one user and never shared.
//! - [`VirtualUser`]: the per-user loop — on-start once, then select →
//!   execute → record → wait until told to stop.
//! - [`MetricsCollector`]: the one piece of shared state; a thread-safe
//!   sink turning every execution into [`AggregateStats`] on demand.
//! - [`VirtualUserPool`]: orchestration — paced ramp-up to the target user
//!   count, steady state, and bounded graceful shutdown.
//!
//! Each virtual user is a single Tokio task, so tens of thousands of idle
//! or network-waiting users cost almost nothing; within one user, task
//! executions are strictly sequential, which keeps session state
//! consistent without locks.
//!
//! # Design goals
//!
//! - Fatal errors only before the run: a plan that cannot produce traffic
//!   is rejected before the first user spawns. Everything after that is
//!   data in the final report, never a crash.
//! - Diagnosable results: startup failures, per-kind execution failures,
//!   and forced shutdowns are surfaced separately so a misconfigured
//!   scenario is visible without reading logs line by line.
//! - Bounded termination: an in-flight task always runs to completion, and
//!   stragglers are aborted after the grace period rather than blocking
//!   shutdown indefinitely.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stampede::{
//!     classify_status, task, HttpRequest, Outcome, ReqwestTransport, RunPlan, SessionContext,
//!     TaskRegistry, Transport, VirtualUserPool, WaitTimePolicy,
//! };
//!
//! async fn browse(_session: &mut SessionContext, transport: &dyn Transport) -> Outcome {
//!     match transport.send(HttpRequest::get("/api/guides")).await {
//!         Ok(resp) => match classify_status(resp.status) {
//!             None => Outcome::Success,
//!             Some(kind) => Outcome::Failure(kind),
//!         },
//!         Err(kind) => Outcome::Failure(kind),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = TaskRegistry::builder()
//!         .task("browse", 1, task!(browse))
//!         .build();
//!
//!     let plan = RunPlan::builder()
//!         .target_user_count(100)
//!         .spawn_rate_per_sec(10.0)
//!         .run_duration(Duration::from_secs(60))
//!         .host("http://localhost:4000")
//!         .wait_policy(
//!             WaitTimePolicy::between(Duration::from_millis(500), Duration::from_secs(2))
//!                 .unwrap(),
//!         )
//!         .registry(Arc::new(registry))
//!         .build();
//!
//!     let transport = Arc::new(ReqwestTransport::new(plan.host.clone()));
//!     let pool = VirtualUserPool::new(plan, transport).expect("valid plan");
//!     let report = pool.run().await;
//!     println!("{}", stampede::TextReport::from(&report));
//! }
//! ```
//!
//! # Feature flags
//!
//! - `reqwest-transport`: provides [`ReqwestTransport`], the built-in HTTP
//!   implementation of the [`Transport`] trait. (Enabled by default.)
//!   Disable it when you inject your own transport and want the dependency
//!   gone.
//!
//! # Where to start
//!
//! - Read the docs for [`TaskRegistry`], [`RunPlan`], and
//!   [`VirtualUserPool`]; then see `demos/http.rs` for a complete scenario
//!   with authentication and chained tasks.

/// Configuration errors raised before a run starts
pub mod error;
/// Sample collection and aggregate statistics
pub mod metrics;
/// Ramp-up, steady state, and shutdown orchestration
pub mod pool;
/// Reports and Reporters
pub mod report;
/// Per-user session state
pub mod session;
/// Task definitions, the weighted registry, and the scheduler
pub mod task;
/// The injected HTTP transport boundary
pub mod transport;
/// The per-user execution loop
pub mod user;
/// Pauses between a user's consecutive executions
pub mod wait;

pub use error::ConfigError;
pub use metrics::{AggregateStats, ExecutionSample, MetricsCollector, TaskStats};
pub use pool::{PoolHandle, RunPlan, RunReport, VirtualUserPool};
pub use report::{JsonReport, Reporter, StdoutReporter, TextReport};
pub use session::SessionContext;
pub use task::{task_fn, FailureKind, Outcome, TaskDefinition, TaskRegistry, TaskScheduler};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use transport::{classify_status, HttpBody, HttpMethod, HttpRequest, HttpResponse, Transport};
pub use user::{ActiveUsers, UserState, VirtualUser};
pub use wait::WaitTimePolicy;
