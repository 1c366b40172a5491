use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating a [`RunPlan`](crate::RunPlan) before any
/// virtual user is spawned.
///
/// These are the only fatal errors in the engine. Everything that happens
/// once users are running (failed requests, auth rejections, slow tasks) is
/// recorded as data in the metrics stream instead of being propagated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The registry contains no tasks at all.
    #[error("task registry is empty")]
    EmptyRegistry,

    /// Every task in the registry has weight zero, so nothing is selectable.
    #[error("task registry has no selectable task (total weight is zero)")]
    NoRunnableTasks,

    /// Task names must be unique within a registry.
    #[error("duplicate task name {0:?} in registry")]
    DuplicateTaskName(String),

    /// `target_user_count` must be at least one.
    #[error("target user count must be positive")]
    NonPositiveUserCount,

    /// `spawn_rate_per_sec` must be a positive, finite number.
    #[error("spawn rate must be positive and finite (got {0})")]
    NonPositiveSpawnRate(f64),

    /// A `Between` wait policy was built with min > max.
    #[error("wait time range is inverted (min {min:?} > max {max:?})")]
    InvertedWaitRange { min: Duration, max: Duration },
}
