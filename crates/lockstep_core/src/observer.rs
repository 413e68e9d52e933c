//! Continuous queries.
//!
//! An observer is a read plan whose result is pushed to the subscriber
//! whenever it may have changed. "May have changed" is decided from table
//! versions alone: after a commit, every observer that reads a table the
//! commit wrote, and whose recorded version of that table is now out of
//! date, is re-run. Result sets are never diffed, so a re-run can deliver
//! the same rows as before.
//!
//! Re-runs are ordinary read-only tasks that go through the runner like any
//! other task, so they see a consistent snapshot of their read scope.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (id, events) = db.subscribe(plan, vec![Value::from("new")])?;
//!
//! // The first event is the initial evaluation.
//! let initial = events.recv()?;
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{}: {:?}", event.subscription, event.result);
//!     }
//! });
//! ```

use crate::error::{CoreError, CoreResult};
use crate::plan::{PlanRef, PlanResult};
use crate::schema::Catalog;
use crate::scope::{compute_scope, TableScope};
use crate::task::{Runner, Task, TaskOrigin, TaskOutcome, TaskType};
use crate::types::{SubscriptionId, TableId, TaskId, Version};
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// One evaluation of a continuous query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    /// The subscription this result belongs to.
    pub subscription: SubscriptionId,
    /// The plan's result.
    pub result: PlanResult,
    /// Versions of the read scope the result was computed at.
    pub versions: BTreeMap<TableId, Version>,
    /// Parameters the plan ran with.
    pub parameters: Vec<Value>,
}

/// State a subscription keeps between evaluations.
#[derive(Debug)]
pub struct ObserverBinding {
    query_id: SubscriptionId,
    plan: PlanRef,
    scope: TableScope,
    last_versions: BTreeMap<TableId, Version>,
    last_parameters: Option<Vec<Value>>,
    parameters: Vec<Value>,
    sender: Sender<QueryEvent>,
}

impl ObserverBinding {
    /// Returns the subscription id.
    #[must_use]
    pub fn query_id(&self) -> SubscriptionId {
        self.query_id
    }

    /// Returns the observed plan's scope.
    #[must_use]
    pub fn scope(&self) -> &TableScope {
        &self.scope
    }

    /// Returns the versions recorded at the last successful evaluation.
    #[must_use]
    pub fn last_versions(&self) -> &BTreeMap<TableId, Version> {
        &self.last_versions
    }

    /// Returns the parameters of the last successful evaluation.
    #[must_use]
    pub fn last_parameters(&self) -> Option<&[Value]> {
        self.last_parameters.as_deref()
    }

    /// Returns true if a commit that produced `written` makes this binding
    /// stale, or if its parameters changed since the last evaluation.
    #[must_use]
    pub fn needs_rerun(&self, written: &BTreeMap<TableId, Version>) -> bool {
        if self.last_parameters.as_ref() != Some(&self.parameters) {
            return true;
        }
        written
            .iter()
            .any(|(t, v)| self.scope.can_read(*t) && self.last_versions.get(t) != Some(v))
    }

    /// A result computed at older versions, or with superseded parameters,
    /// must not overwrite a newer one.
    fn is_stale(&self, outcome: &TaskOutcome, parameters: &[Value]) -> bool {
        parameters != self.parameters.as_slice()
            || outcome
                .read_versions
                .iter()
                .any(|(t, v)| self.last_versions.get(t).is_some_and(|last| v < last))
    }
}

/// All live subscriptions of a database.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    bindings: Mutex<HashMap<SubscriptionId, ObserverBinding>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Returns true if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }

    /// Returns true if the subscription is live.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.bindings.lock().contains_key(&id)
    }

    /// Returns the versions a subscription last evaluated at.
    #[must_use]
    pub fn last_versions(&self, id: SubscriptionId) -> Option<BTreeMap<TableId, Version>> {
        self.bindings.lock().get(&id).map(|b| b.last_versions.clone())
    }

    /// Registers a read plan. Nothing is evaluated yet.
    pub(crate) fn register(
        &self,
        plan: PlanRef,
        parameters: Vec<Value>,
        catalog: &Catalog,
    ) -> CoreResult<(SubscriptionId, Receiver<QueryEvent>)> {
        let scope = compute_scope(std::slice::from_ref(&plan), catalog)?;
        if !scope.is_read_only() {
            return Err(CoreError::invalid_operation(
                "only read plans can be observed",
            ));
        }
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = mpsc::channel();
        let binding = ObserverBinding {
            query_id: id,
            plan,
            scope,
            last_versions: BTreeMap::new(),
            last_parameters: None,
            parameters,
            sender,
        };
        self.bindings.lock().insert(id, binding);
        Ok((id, receiver))
    }

    /// Drops a subscription.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.bindings.lock().remove(&id).is_some()
    }

    /// Replaces a subscription's parameters. The next evaluation uses them.
    pub(crate) fn set_parameters(&self, id: SubscriptionId, parameters: Vec<Value>) -> CoreResult<()> {
        let mut bindings = self.bindings.lock();
        let binding = bindings
            .get_mut(&id)
            .ok_or(CoreError::SubscriptionNotFound(id))?;
        binding.parameters = parameters;
        Ok(())
    }

    /// Subscriptions a commit with the given new versions makes stale.
    pub(crate) fn due(&self, written: &BTreeMap<TableId, Version>) -> Vec<SubscriptionId> {
        let bindings = self.bindings.lock();
        let mut due: Vec<_> = bindings
            .values()
            .filter(|b| written.keys().any(|t| b.scope.can_read(*t)) && b.needs_rerun(written))
            .map(|b| b.query_id)
            .collect();
        due.sort_unstable();
        due
    }

    /// Evaluates a subscription as an implicit read-only task and delivers
    /// the result.
    ///
    /// The registry lock is not held while the task runs. On failure the
    /// binding is left as it was, so the next commit retries.
    ///
    /// Returns false if the result was discarded as stale, or if the
    /// subscriber went away.
    pub(crate) fn evaluate(
        &self,
        id: SubscriptionId,
        task: TaskId,
        runner: &Runner,
        timeout: Option<std::time::Duration>,
    ) -> CoreResult<bool> {
        let (plan, parameters) = {
            let bindings = self.bindings.lock();
            let binding = bindings
                .get(&id)
                .ok_or(CoreError::SubscriptionNotFound(id))?;
            (binding.plan.clone(), binding.parameters.clone())
        };

        let task = Task::new(
            task,
            TaskType::ReadOnly,
            TaskOrigin::Implicit,
            vec![plan],
            parameters.clone(),
            runner.catalog(),
        )?
        .bound_to(id);
        let mut outcome = runner.execute(task, timeout)?;

        let mut bindings = self.bindings.lock();
        let Some(binding) = bindings.get_mut(&id) else {
            return Ok(false);
        };
        if binding.is_stale(&outcome, &parameters) {
            debug!(subscription = %id, task = %outcome.task, "discarding stale observer result");
            return Ok(false);
        }
        let result = outcome
            .results
            .pop()
            .ok_or_else(|| CoreError::internal("observer task produced no result"))?;
        binding.last_versions = outcome.read_versions.clone();
        binding.last_parameters = Some(parameters.clone());

        let event = QueryEvent {
            subscription: id,
            result,
            versions: outcome.read_versions,
            parameters,
        };
        if binding.sender.send(event).is_err() {
            debug!(subscription = %id, "subscriber dropped, removing observer");
            bindings.remove(&id);
            return Ok(false);
        }
        Ok(true)
    }
}
