//! Task definitions, the weighted registry, and the per-user scheduler.
//!
//! A task is an explicit registry entry: a name, a relative weight, and an
//! async action taking the user's [`SessionContext`] and the run's
//! [`Transport`]. Weighting and on-start designation are data, not
//! convention — there is no runtime introspection of user objects.
//!
//! Selection is cumulative-weight sampling: a [`TaskScheduler`] draws from a
//! precomputed [`WeightedIndex`] so each task is picked with probability
//! proportional to its weight. Weight zero keeps a task in the registry but
//! excludes it from selection. A registry whose total weight is zero is
//! rejected when the run plan is validated, before any user is spawned.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;

use crate::error::ConfigError;
use crate::session::SessionContext;
use crate::transport::Transport;

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Classification of a failed task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    ServerError(u16),
    AuthError,
    ProtocolError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ConnectionError => write!(f, "connection_error"),
            FailureKind::ServerError(status) => write!(f, "server_error_{status}"),
            FailureKind::AuthError => write!(f, "auth_error"),
            FailureKind::ProtocolError => write!(f, "protocol_error"),
        }
    }
}

/// The callable side of a task: borrows the user's session mutably and the
/// shared transport for the duration of one execution.
pub type TaskFn = Arc<
    dyn for<'a> Fn(&'a mut SessionContext, &'a dyn Transport) -> BoxFuture<'a, Outcome>
        + Send
        + Sync,
>;

/// Wraps a closure into a [`TaskFn`]. Mostly used through the [`task!`]
/// macro, which adapts a plain `async fn`.
pub fn task_fn<F>(f: F) -> TaskFn
where
    F: for<'a> Fn(&'a mut SessionContext, &'a dyn Transport) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Adapts an `async fn(&mut SessionContext, &dyn Transport) -> Outcome`
/// into a [`TaskFn`] registry entry.
///
/// ```rust
/// use stampede::{task, Outcome, SessionContext, TaskRegistry, Transport};
///
/// async fn browse(_session: &mut SessionContext, _transport: &dyn Transport) -> Outcome {
///     Outcome::Success
/// }
///
/// let registry = TaskRegistry::builder().task("browse", 1, task!(browse)).build();
/// assert_eq!(registry.tasks().len(), 1);
/// ```
#[macro_export]
macro_rules! task {
    ($func:path) => {
        $crate::task::task_fn(move |session, transport| {
            ::std::boxed::Box::pin($func(session, transport))
        })
    };
}

/// A named, weighted unit of work a virtual user may perform.
pub struct TaskDefinition {
    name: String,
    weight: u32,
    action: TaskFn,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, weight: u32, action: TaskFn) -> Self {
        Self {
            name: name.into(),
            weight,
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn action(&self) -> &TaskFn {
        &self.action
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Immutable table of weighted tasks plus an optional on-start task run
/// exactly once per user before normal selection begins.
///
/// Built once from configuration and shared read-only behind an `Arc`
/// across all virtual users.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Vec<TaskDefinition>,
    on_start: Option<TaskDefinition>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn on_start(&self) -> Option<&TaskDefinition> {
        self.on_start.as_ref()
    }

    /// Precomputes the cumulative-weight table used for selection.
    ///
    /// Fails when the registry is empty, when no task carries a positive
    /// weight, or when two tasks share a name — all conditions a run plan
    /// must reject before spawning anything.
    pub fn selection_index(&self) -> Result<WeightedIndex<u64>, ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        for (i, task) in self.tasks.iter().enumerate() {
            if self.tasks[..i].iter().any(|t| t.name == task.name) {
                return Err(ConfigError::DuplicateTaskName(task.name.clone()));
            }
        }
        let total: u64 = self.tasks.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return Err(ConfigError::NoRunnableTasks);
        }
        WeightedIndex::new(self.tasks.iter().map(|t| u64::from(t.weight)))
            .map_err(|_| ConfigError::NoRunnableTasks)
    }
}

#[derive(Default)]
pub struct TaskRegistryBuilder {
    tasks: Vec<TaskDefinition>,
    on_start: Option<TaskDefinition>,
}

impl TaskRegistryBuilder {
    pub fn task(mut self, name: impl Into<String>, weight: u32, action: TaskFn) -> Self {
        self.tasks.push(TaskDefinition::new(name, weight, action));
        self
    }

    /// Registers the task run once per user before steady-state selection.
    /// Typically authentication: log in and stash the token in the session.
    pub fn on_start(mut self, name: impl Into<String>, action: TaskFn) -> Self {
        self.on_start = Some(TaskDefinition::new(name, 0, action));
        self
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            tasks: self.tasks,
            on_start: self.on_start,
        }
    }
}

/// Weighted random task selection for one virtual user.
///
/// Each user owns its own scheduler (index clone plus RNG), so selections
/// are independent per call and per user with no cross-user ordering.
pub struct TaskScheduler {
    dist: WeightedIndex<u64>,
    rng: StdRng,
}

impl TaskScheduler {
    pub fn new(registry: &TaskRegistry) -> Result<Self, ConfigError> {
        Ok(Self::with_index(registry.selection_index()?))
    }

    pub(crate) fn with_index(dist: WeightedIndex<u64>) -> Self {
        Self {
            dist,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Picks the next task with probability proportional to its weight.
    pub fn select_next<'r>(&mut self, registry: &'r TaskRegistry) -> &'r TaskDefinition {
        let idx = self.dist.sample(&mut self.rng);
        &registry.tasks()[idx]
    }
}
