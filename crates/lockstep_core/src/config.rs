//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `exec()` waits for admission before withdrawing the task.
    ///
    /// `None` waits indefinitely.
    pub exec_timeout: Option<Duration>,

    /// Maximum number of tasks waiting for admission (0 = unbounded).
    pub max_pending_tasks: usize,

    /// Whether writes check foreign keys.
    pub enforce_foreign_keys: bool,

    /// Whether commits trigger observer re-runs.
    ///
    /// When disabled, observers are only evaluated on subscribe and on
    /// parameter changes.
    pub observer_reruns: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exec_timeout: None,
            max_pending_tasks: 0,
            enforce_foreign_keys: true,
            observer_reruns: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the admission timeout for `exec()`.
    #[must_use]
    pub const fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = Some(timeout);
        self
    }

    /// Sets the pending queue limit.
    #[must_use]
    pub const fn max_pending_tasks(mut self, limit: usize) -> Self {
        self.max_pending_tasks = limit;
        self
    }

    /// Sets whether foreign keys are enforced.
    #[must_use]
    pub const fn enforce_foreign_keys(mut self, value: bool) -> Self {
        self.enforce_foreign_keys = value;
        self
    }

    /// Sets whether commits trigger observer re-runs.
    #[must_use]
    pub const fn observer_reruns(mut self, value: bool) -> Self {
        self.observer_reruns = value;
        self
    }
}
