//! Task state.

use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalView};
use crate::plan::{PlanRef, PlanResult};
use crate::schema::Catalog;
use crate::scope::{compute_scope, TableScope};
use crate::task::ExecEnv;
use crate::types::{SubscriptionId, TaskId};
use crate::value::Value;

/// Whether a task may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Takes only read locks.
    ReadOnly,
    /// Takes write locks on the tables its plans write.
    ReadWrite,
}

impl TaskType {
    /// Picks `ReadWrite` iff any plan declares an output table.
    #[must_use]
    pub fn infer(plans: &[PlanRef]) -> Self {
        if plans.iter().any(|p| !p.outputs().is_empty()) {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }
}

/// How a task came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    /// Created from a transaction handle.
    Explicit,
    /// Created for a single plan, or for an observer re-run.
    Implicit,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for admission.
    Pending,
    /// Admitted and executing.
    Running,
    /// Flushed and released.
    Committed,
    /// Discarded; nothing it staged was persisted.
    RolledBack,
}

/// One transaction's worth of work.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    ty: TaskType,
    origin: TaskOrigin,
    plans: Vec<PlanRef>,
    scope: TableScope,
    state: TaskState,
    params: Vec<Value>,
    binding: Option<SubscriptionId>,
}

impl Task {
    /// Creates a pending task and resolves its scope.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if a plan names an unknown table, or
    /// `InvalidOperation` if a read-only task contains a write plan.
    pub fn new(
        id: TaskId,
        ty: TaskType,
        origin: TaskOrigin,
        plans: Vec<PlanRef>,
        params: Vec<Value>,
        catalog: &Catalog,
    ) -> CoreResult<Self> {
        let scope = compute_scope(&plans, catalog)?;
        if ty == TaskType::ReadOnly && !scope.is_read_only() {
            return Err(CoreError::invalid_operation(format!(
                "read-only {id} contains write plans"
            )));
        }
        Ok(Self {
            id,
            ty,
            origin,
            plans,
            scope,
            state: TaskState::Pending,
            params,
            binding: None,
        })
    }

    /// Marks the task as the re-run of an observer.
    #[must_use]
    pub(crate) fn bound_to(mut self, subscription: SubscriptionId) -> Self {
        self.binding = Some(subscription);
        self
    }

    /// Returns the task ID.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task type.
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        self.ty
    }

    /// Returns how the task was created.
    #[must_use]
    pub fn origin(&self) -> TaskOrigin {
        self.origin
    }

    /// Returns the plans in execution order.
    #[must_use]
    pub fn plans(&self) -> &[PlanRef] {
        &self.plans
    }

    /// Returns the resolved scope.
    #[must_use]
    pub fn scope(&self) -> &TableScope {
        &self.scope
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Returns the bound parameters.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Returns the observer this task re-runs, if any.
    #[must_use]
    pub fn binding(&self) -> Option<SubscriptionId> {
        self.binding
    }

    pub(crate) fn transition(&mut self, next: TaskState) -> CoreResult<()> {
        use TaskState::{Committed, Pending, RolledBack, Running};
        let allowed = matches!(
            (self.state, next),
            (Pending, Running) | (Pending, RolledBack) | (Running, Committed) | (Running, RolledBack)
        );
        if !allowed {
            return Err(CoreError::internal(format!(
                "{} cannot move from {:?} to {next:?}",
                self.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Executes every plan in order against `journal`.
    ///
    /// Stops at the first failing plan.
    pub(crate) fn run(&self, env: &ExecEnv<'_>, journal: &mut Journal) -> CoreResult<Vec<PlanResult>> {
        let mut view = JournalView::new(env, &self.scope, journal, &self.params);
        self.plans.iter().map(|plan| plan.execute(&mut view)).collect()
    }
}

/// What `exec()` hands back for a committed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The task that ran.
    pub task: TaskId,
    /// One result per plan, in plan order.
    pub results: Vec<PlanResult>,
}

impl ExecResult {
    /// Returns the result of the only plan, for single-plan executions.
    #[must_use]
    pub fn single(&self) -> Option<&PlanResult> {
        match self.results.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}
