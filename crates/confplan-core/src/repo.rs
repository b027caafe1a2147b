//! The persistence contract.
//!
//! Every backend exposes read-only loads plus a transactional
//! [`UnitOfWork`]. The engine requires snapshot isolation for a single write
//! transaction: all reads inside a unit of work observe the state as of
//! `begin`, and `commit` publishes every staged write atomically. Analytical
//! code loads a [`PlanSnapshot`] once and never touches the repository
//! again.

use crate::history::{HistoricalSample, StateSnapshot, TransitionMatrix};
use crate::workflow::{ActionStatus, ExternalEvent, ProposedAction, TaskLock};
use crate::{Bucket, Dependency, Plan, PlanError, PlanId, Result, Task, TaskId};

// ============================================================================
// Snapshot
// ============================================================================

/// A consistent in-memory view of one plan: metadata, buckets, tasks (with
/// their subtasks) and the dependency edge set.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PlanSnapshot {
    pub plan: Plan,
    pub buckets: Vec<Bucket>,
    pub tasks: Vec<Task>,
    pub dependencies: Vec<Dependency>,
}

impl PlanSnapshot {
    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Like [`PlanSnapshot::get_task`] but failing with `TaskNotFound`.
    pub fn require_task(&self, task_id: &str) -> Result<&Task> {
        self.get_task(task_id)
            .ok_or_else(|| PlanError::TaskNotFound(task_id.to_string()))
    }

    pub fn get_bucket(&self, bucket_id: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.id == bucket_id)
    }

    /// Content fingerprint of the snapshot.
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::plan_fingerprint(self)
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Abstract persistence used by every engine component.
pub trait Repository: Send + Sync {
    /// All plans, templates included.
    fn list_plans(&self) -> Result<Vec<Plan>>;

    /// Load one plan with tasks, subtasks and dependencies.
    fn load_plan(&self, plan_id: &str) -> Result<PlanSnapshot>;

    /// Historical samples contributed by the given past plans (all plans
    /// when empty).
    fn load_history(&self, plan_ids: &[PlanId]) -> Result<Vec<HistoricalSample>>;

    /// State snapshots recorded for a Markov context.
    fn load_state_snapshots(&self, context: &str) -> Result<Vec<StateSnapshot>>;

    /// A previously learned transition matrix for a context, if stored.
    fn load_transition_matrix(&self, context: &str) -> Result<Option<TransitionMatrix>>;

    /// Current lock on a task, expired or not. Expiry policy lives in the
    /// lock manager, not the backend.
    fn get_lock(&self, plan_id: &str, task_id: &str) -> Result<Option<TaskLock>>;

    /// Insert or replace the lock row for `(lock.plan_id, lock.task_id)`.
    fn put_lock(&self, lock: TaskLock) -> Result<()>;

    /// Remove the lock row, if present.
    fn remove_lock(&self, plan_id: &str, task_id: &str) -> Result<()>;

    /// Events for a plan, ascending by id.
    fn list_events(&self, plan_id: &str) -> Result<Vec<ExternalEvent>>;

    /// Proposed actions for a plan, optionally filtered by status,
    /// ascending by id.
    fn list_actions(
        &self,
        plan_id: &str,
        status: Option<ActionStatus>,
    ) -> Result<Vec<ProposedAction>>;

    /// Begin a snapshot-isolated unit of work.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;
}

// ============================================================================
// Unit of work
// ============================================================================

/// A single write transaction. Dropping without [`UnitOfWork::commit`]
/// rolls back.
pub trait UnitOfWork {
    /// Read a plan inside the transaction (sees staged writes).
    fn plan(&self, plan_id: &str) -> Result<PlanSnapshot>;

    fn put_plan(&mut self, plan: Plan) -> Result<()>;
    fn delete_plan(&mut self, plan_id: &str) -> Result<()>;

    fn put_bucket(&mut self, plan_id: &str, bucket: Bucket) -> Result<()>;

    /// Insert or replace a task (including its subtasks).
    fn put_task(&mut self, plan_id: &str, task: Task) -> Result<()>;

    /// Delete a task, cascading to subtasks, dependency edges, locks and
    /// pending actions targeting it.
    fn delete_task(&mut self, plan_id: &str, task_id: &str) -> Result<()>;

    /// Add a dependency edge. Fails with `DuplicateDependency` on a repeated
    /// (predecessor, successor) pair; endpoint existence is checked here,
    /// acyclicity by the mutation core before calling.
    fn add_dependency(&mut self, plan_id: &str, dep: Dependency) -> Result<()>;

    fn remove_dependency(
        &mut self,
        plan_id: &str,
        predecessor: &TaskId,
        successor: &TaskId,
    ) -> Result<()>;

    /// Allocate the next monotonic event id for a plan.
    fn next_event_id(&mut self, plan_id: &str) -> Result<i64>;

    /// Allocate the next monotonic action id for a plan.
    fn next_action_id(&mut self, plan_id: &str) -> Result<i64>;

    fn put_event(&mut self, event: ExternalEvent) -> Result<()>;
    fn delete_event(&mut self, plan_id: &str, event_id: i64) -> Result<()>;

    fn get_action(&self, plan_id: &str, action_id: i64) -> Result<ProposedAction>;
    fn put_action(&mut self, action: ProposedAction) -> Result<()>;
    fn delete_action(&mut self, plan_id: &str, action_id: i64) -> Result<()>;

    /// Publish all staged writes atomically.
    fn commit(self: Box<Self>) -> Result<()>;
}
