//! The per-user execution loop.
//!
//! A [`VirtualUser`] is one simulated actor: it runs the registry's
//! on-start task once (typically authentication), then loops selecting a
//! weighted task, executing it against the transport with its own session,
//! recording one sample per execution, and pausing per the wait policy.
//!
//! # Lifecycle
//!
//! `Created → Starting → Running → Stopping → Stopped`, with `Starting`
//! skipped when no on-start task is configured. A failed on-start moves the
//! user straight to `Stopped` with a single startup-failure record — a user
//! that cannot authenticate must not generate misleading traffic.
//!
//! # Cancellation
//!
//! The stop signal is observed at loop-iteration boundaries and during the
//! inter-task wait, never mid-action: an in-flight task always runs to
//! completion (or its own transport timeout), which bounds shutdown latency
//! to one task's maximum execution time and never abandons a task halfway
//! through mutating session state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::prelude::*;
use tokio::sync::watch;

use crate::metrics::{ExecutionSample, MetricsCollector};
use crate::session::SessionContext;
use crate::task::{Outcome, TaskRegistry, TaskScheduler};
use crate::transport::Transport;
use crate::wait::WaitTimePolicy;

/// Lifecycle states of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Atomic count of currently-active virtual users, shared between the pool
/// and every user task.
#[derive(Clone, Default)]
pub struct ActiveUsers(Arc<AtomicU32>);

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One simulated independent actor. Owns its session and scheduler
/// exclusively; shares only the transport and the metrics collector.
pub struct VirtualUser {
    id: u64,
    session: SessionContext,
    registry: Arc<TaskRegistry>,
    scheduler: TaskScheduler,
    wait: WaitTimePolicy,
    transport: Arc<dyn Transport>,
    collector: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
    active: ActiveUsers,
    rng: StdRng,
}

impl VirtualUser {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        registry: Arc<TaskRegistry>,
        scheduler: TaskScheduler,
        wait: WaitTimePolicy,
        transport: Arc<dyn Transport>,
        collector: Arc<MetricsCollector>,
        shutdown: watch::Receiver<bool>,
        active: ActiveUsers,
    ) -> Self {
        Self {
            id,
            session: SessionContext::new(id),
            registry,
            scheduler,
            wait,
            transport,
            collector,
            shutdown,
            active,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Drives the user through its state machine until `Stopped`.
    pub async fn run(mut self) {
        self.active.increment();
        tracing::debug!(user = self.id, "virtual user spawned");

        let mut state = UserState::Created;
        loop {
            state = match state {
                UserState::Created => {
                    if self.registry.on_start().is_some() {
                        UserState::Starting
                    } else {
                        UserState::Running
                    }
                }
                UserState::Starting => self.run_on_start().await,
                UserState::Running => self.run_iteration().await,
                UserState::Stopping => UserState::Stopped,
                UserState::Stopped => break,
            };
        }

        self.active.decrement();
        tracing::debug!(user = self.id, "virtual user stopped");
    }

    /// Runs the on-start task once. Success moves to `Running`; failure
    /// records a startup failure and moves straight to `Stopped`.
    async fn run_on_start(&mut self) -> UserState {
        let def = self
            .registry
            .on_start()
            .expect("Starting state requires an on-start task");
        let name = def.name().to_string();
        let action = def.action().clone();

        let started = Instant::now();
        let outcome = (action.as_ref())(&mut self.session, self.transport.as_ref()).await;
        let duration = started.elapsed();

        match outcome {
            Outcome::Success => {
                self.collector.record(ExecutionSample {
                    task_name: name,
                    start: started,
                    duration,
                    outcome: Outcome::Success,
                });
                UserState::Running
            }
            Outcome::Failure(kind) => {
                tracing::warn!(user = self.id, task = %name, %kind, "on-start task failed");
                self.collector.record_startup_failure(kind);
                UserState::Stopped
            }
        }
    }

    /// One steady-state iteration: select, execute, record, wait.
    async fn run_iteration(&mut self) -> UserState {
        if *self.shutdown.borrow() {
            return UserState::Stopping;
        }

        let def = self.scheduler.select_next(self.registry.as_ref());
        let name = def.name().to_string();
        let action = def.action().clone();

        let started = Instant::now();
        let outcome = (action.as_ref())(&mut self.session, self.transport.as_ref()).await;
        let duration = started.elapsed();

        if let Outcome::Failure(kind) = &outcome {
            tracing::trace!(user = self.id, task = %name, %kind, "task failed");
        }
        self.collector.record(ExecutionSample {
            task_name: name,
            start: started,
            duration,
            outcome,
        });

        let delay = self.wait.next_delay(&mut self.rng);
        if !delay.is_zero() {
            // The wait is interruptible; the action above is not.
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.wait_for(|stop| *stop) => {}
            }
        }

        UserState::Running
    }
}
