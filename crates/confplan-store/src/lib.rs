//! # confplan-store
//!
//! In-memory reference backend for the repository contract.
//!
//! Transactions take a full copy of the state at `begin`, stage every write
//! against the copy, and publish it with a single swap under the write lock
//! at `commit`. That gives the snapshot isolation the engine requires for a
//! single write transaction; readers never observe a half-applied mutation.
//! Dropping a transaction without committing discards the copy.
//!
//! Locks live outside transactional state on purpose: the lock table is the
//! one piece of shared mutable state requests contend on, and its critical
//! sections must stay short.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use confplan_core::{
    ActionStatus, Bucket, Dependency, ExternalEvent, HistoricalSample, Plan, PlanError, PlanId,
    PlanSnapshot, ProposedAction, Repository, Result, StateSnapshot, Task, TaskId, TaskLock,
    TransitionMatrix, UnitOfWork,
};

/// One plan's stored rows.
#[derive(Clone, Debug, Default)]
struct PlanRecord {
    plan: Option<Plan>,
    buckets: Vec<Bucket>,
    tasks: Vec<Task>,
    dependencies: Vec<Dependency>,
    events: BTreeMap<i64, ExternalEvent>,
    actions: BTreeMap<i64, ProposedAction>,
    next_event_id: i64,
    next_action_id: i64,
}

/// Whole-store state. Cloned per transaction.
#[derive(Clone, Debug, Default)]
struct State {
    plans: BTreeMap<PlanId, PlanRecord>,
    history: Vec<HistoricalSample>,
    state_snapshots: Vec<StateSnapshot>,
    matrices: BTreeMap<String, TransitionMatrix>,
}

impl State {
    fn record(&self, plan_id: &str) -> Result<&PlanRecord> {
        self.plans
            .get(plan_id)
            .filter(|r| r.plan.is_some())
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))
    }

    fn record_mut(&mut self, plan_id: &str) -> Result<&mut PlanRecord> {
        self.plans
            .get_mut(plan_id)
            .filter(|r| r.plan.is_some())
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))
    }

    fn snapshot(&self, plan_id: &str) -> Result<PlanSnapshot> {
        let record = self.record(plan_id)?;
        Ok(PlanSnapshot {
            plan: record.plan.clone().expect("record filtered on plan"),
            buckets: record.buckets.clone(),
            tasks: record.tasks.clone(),
            dependencies: record.dependencies.clone(),
        })
    }
}

/// The in-memory repository.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<State>>,
    locks: Arc<RwLock<BTreeMap<(PlanId, TaskId), TaskLock>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed historical samples (test and CLI fixtures).
    pub fn seed_history(&self, samples: Vec<HistoricalSample>) {
        self.state.write().history.extend(samples);
    }

    /// Seed Markov state snapshots.
    pub fn seed_state_snapshots(&self, snapshots: Vec<StateSnapshot>) {
        self.state.write().state_snapshots.extend(snapshots);
    }

    /// Store a learned transition matrix.
    pub fn put_transition_matrix(&self, matrix: TransitionMatrix) {
        self.state
            .write()
            .matrices
            .insert(matrix.context.clone(), matrix);
    }
}

impl Repository for MemoryRepository {
    fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self
            .state
            .read()
            .plans
            .values()
            .filter_map(|r| r.plan.clone())
            .collect())
    }

    fn load_plan(&self, plan_id: &str) -> Result<PlanSnapshot> {
        self.state.read().snapshot(plan_id)
    }

    fn load_history(&self, plan_ids: &[PlanId]) -> Result<Vec<HistoricalSample>> {
        let state = self.state.read();
        Ok(state
            .history
            .iter()
            .filter(|s| plan_ids.is_empty() || plan_ids.contains(&s.plan_id))
            .cloned()
            .collect())
    }

    fn load_state_snapshots(&self, context: &str) -> Result<Vec<StateSnapshot>> {
        Ok(self
            .state
            .read()
            .state_snapshots
            .iter()
            .filter(|s| s.context == context)
            .cloned()
            .collect())
    }

    fn load_transition_matrix(&self, context: &str) -> Result<Option<TransitionMatrix>> {
        Ok(self.state.read().matrices.get(context).cloned())
    }

    fn get_lock(&self, plan_id: &str, task_id: &str) -> Result<Option<TaskLock>> {
        Ok(self
            .locks
            .read()
            .get(&(plan_id.to_string(), task_id.to_string()))
            .cloned())
    }

    fn put_lock(&self, lock: TaskLock) -> Result<()> {
        self.locks
            .write()
            .insert((lock.plan_id.clone(), lock.task_id.clone()), lock);
        Ok(())
    }

    fn remove_lock(&self, plan_id: &str, task_id: &str) -> Result<()> {
        self.locks
            .write()
            .remove(&(plan_id.to_string(), task_id.to_string()));
        Ok(())
    }

    fn list_events(&self, plan_id: &str) -> Result<Vec<ExternalEvent>> {
        let state = self.state.read();
        Ok(state.record(plan_id)?.events.values().cloned().collect())
    }

    fn list_actions(
        &self,
        plan_id: &str,
        status: Option<ActionStatus>,
    ) -> Result<Vec<ProposedAction>> {
        let state = self.state.read();
        Ok(state
            .record(plan_id)?
            .actions
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect())
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        let staged = self.state.read().clone();
        Ok(Box::new(MemoryUnitOfWork {
            repository: self,
            staged,
        }))
    }
}

/// A staged copy of the store, committed by swapping it in.
struct MemoryUnitOfWork<'a> {
    repository: &'a MemoryRepository,
    staged: State,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn plan(&self, plan_id: &str) -> Result<PlanSnapshot> {
        self.staged.snapshot(plan_id)
    }

    fn put_plan(&mut self, plan: Plan) -> Result<()> {
        let record = self.staged.plans.entry(plan.id.clone()).or_default();
        record.plan = Some(plan);
        Ok(())
    }

    fn delete_plan(&mut self, plan_id: &str) -> Result<()> {
        self.staged
            .plans
            .remove(plan_id)
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
        Ok(())
    }

    fn put_bucket(&mut self, plan_id: &str, bucket: Bucket) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        match record.buckets.iter_mut().find(|b| b.id == bucket.id) {
            Some(existing) => *existing = bucket,
            None => record.buckets.push(bucket),
        }
        Ok(())
    }

    fn put_task(&mut self, plan_id: &str, task: Task) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        match record.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => record.tasks.push(task),
        }
        Ok(())
    }

    fn delete_task(&mut self, plan_id: &str, task_id: &str) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        let before = record.tasks.len();
        record.tasks.retain(|t| t.id != task_id);
        if record.tasks.len() == before {
            return Err(PlanError::TaskNotFound(task_id.to_string()));
        }
        // Cascade: edges touching the task, and pending actions aimed at it.
        record
            .dependencies
            .retain(|d| d.predecessor != task_id && d.successor != task_id);
        record
            .actions
            .retain(|_, a| !(a.task_id == task_id && a.status == ActionStatus::Pending));
        Ok(())
    }

    fn add_dependency(&mut self, plan_id: &str, dep: Dependency) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        for endpoint in [&dep.predecessor, &dep.successor] {
            if !record.tasks.iter().any(|t| &t.id == endpoint) {
                return Err(PlanError::TaskNotFound(endpoint.clone()));
            }
        }
        if record
            .dependencies
            .iter()
            .any(|d| d.predecessor == dep.predecessor && d.successor == dep.successor)
        {
            return Err(PlanError::DuplicateDependency(
                dep.predecessor,
                dep.successor,
            ));
        }
        record.dependencies.push(dep);
        Ok(())
    }

    fn remove_dependency(
        &mut self,
        plan_id: &str,
        predecessor: &TaskId,
        successor: &TaskId,
    ) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        let before = record.dependencies.len();
        record
            .dependencies
            .retain(|d| !(d.predecessor == *predecessor && d.successor == *successor));
        if record.dependencies.len() == before {
            return Err(PlanError::DependencyNotFound(
                predecessor.clone(),
                successor.clone(),
            ));
        }
        Ok(())
    }

    fn next_event_id(&mut self, plan_id: &str) -> Result<i64> {
        let record = self.staged.record_mut(plan_id)?;
        record.next_event_id += 1;
        Ok(record.next_event_id)
    }

    fn next_action_id(&mut self, plan_id: &str) -> Result<i64> {
        let record = self.staged.record_mut(plan_id)?;
        record.next_action_id += 1;
        Ok(record.next_action_id)
    }

    fn put_event(&mut self, event: ExternalEvent) -> Result<()> {
        let record = self.staged.record_mut(&event.plan_id.clone())?;
        record.events.insert(event.id, event);
        Ok(())
    }

    fn delete_event(&mut self, plan_id: &str, event_id: i64) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        record
            .events
            .remove(&event_id)
            .ok_or(PlanError::EventNotFound(event_id))?;
        Ok(())
    }

    fn get_action(&self, plan_id: &str, action_id: i64) -> Result<ProposedAction> {
        self.staged
            .record(plan_id)?
            .actions
            .get(&action_id)
            .cloned()
            .ok_or(PlanError::ActionNotFound(action_id))
    }

    fn put_action(&mut self, action: ProposedAction) -> Result<()> {
        let record = self.staged.record_mut(&action.plan_id.clone())?;
        record.actions.insert(action.id, action);
        Ok(())
    }

    fn delete_action(&mut self, plan_id: &str, action_id: i64) -> Result<()> {
        let record = self.staged.record_mut(plan_id)?;
        record
            .actions
            .remove(&action_id)
            .ok_or(PlanError::ActionNotFound(action_id))?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        *self.repository.state.write() = self.staged;
        Ok(())
    }
}
