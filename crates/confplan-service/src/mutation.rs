//! The plan mutation core.
//!
//! Every operation runs inside one repository transaction, honours the lock
//! contract, re-validates the touched task's invariants, refreshes the plan
//! fingerprint and dirty-since-sync flag, and commits. On failure nothing
//! is persisted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use confplan_core::{
    Dependency, Plan, PlanError, PlanSnapshot, Repository, Result, Subtask, Task, TaskPatch,
    TaskStatus, UnitOfWork,
};
use confplan_solver::graph::TaskGraph;

use crate::locks::LockManager;

/// Transactional CRUD over plans, tasks, subtasks and dependencies.
#[derive(Clone)]
pub struct MutationCore {
    repo: Arc<dyn Repository>,
    locks: LockManager,
}

impl MutationCore {
    pub fn new(repo: Arc<dyn Repository>, locks: LockManager) -> Self {
        Self { repo, locks }
    }

    /// Create a plan (or a template).
    pub fn create_plan(&self, mut plan: Plan, now: DateTime<Utc>) -> Result<Plan> {
        plan.created_at = now;
        plan.modified_at = now;
        let mut tx = self.repo.begin()?;
        tx.put_plan(plan.clone())?;
        tx.commit()?;
        info!(plan_id = %plan.id, "created plan");
        Ok(plan)
    }

    pub fn create_bucket(
        &self,
        plan_id: &str,
        bucket: confplan_core::Bucket,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.repo.begin()?;
        tx.put_bucket(plan_id, bucket)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()
    }

    /// Create a task. The actor becomes `created_by`.
    pub fn create_task(
        &self,
        plan_id: &str,
        mut task: Task,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.locks.ensure_writable(plan_id, &task.id, actor, now)?;
        task.created_at = now;
        task.modified_at = now;
        task.created_by = Some(actor.to_string());
        task.validate()?;

        let mut tx = self.repo.begin()?;
        if tx.plan(plan_id)?.get_task(&task.id).is_some() {
            return Err(PlanError::Validation(format!(
                "task '{}' already exists in plan '{plan_id}'",
                task.id
            )));
        }
        tx.put_task(plan_id, task.clone())?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        Ok(task)
    }

    /// Apply a partial update.
    pub fn update_task(
        &self,
        plan_id: &str,
        task_id: &str,
        patch: &TaskPatch,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.locks.ensure_writable(plan_id, task_id, actor, now)?;
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        let mut task = snapshot.require_task(task_id)?.clone();
        apply_patch(&mut task, patch, actor, now)?;
        task.validate()?;
        tx.put_task(plan_id, task.clone())?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        Ok(task)
    }

    /// Delete a task, cascading to subtasks, edges, pending actions and its
    /// lock row.
    pub fn delete_task(
        &self,
        plan_id: &str,
        task_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.locks.ensure_writable(plan_id, task_id, actor, now)?;
        let mut tx = self.repo.begin()?;
        tx.delete_task(plan_id, task_id)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        self.repo.remove_lock(plan_id, task_id)?;
        Ok(())
    }

    pub fn add_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        mut subtask: Subtask,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Subtask> {
        self.locks.ensure_writable(plan_id, task_id, actor, now)?;
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        let mut task = snapshot.require_task(task_id)?.clone();
        if task.subtasks.iter().any(|s| s.id == subtask.id) {
            return Err(PlanError::Validation(format!(
                "subtask '{}' already exists on task '{task_id}'",
                subtask.id
            )));
        }
        subtask.modified_at = now;
        if subtask.order_hint.is_empty() {
            subtask.order_hint = next_subtask_hint(&task);
        }
        task.subtasks.push(subtask.clone());
        task.modified_at = now;
        tx.put_task(plan_id, task)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        Ok(subtask)
    }

    pub fn update_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask_id: &str,
        title: Option<String>,
        checked: Option<bool>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Subtask> {
        self.locks.ensure_writable(plan_id, task_id, actor, now)?;
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        let mut task = snapshot.require_task(task_id)?.clone();
        let subtask = task
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)
            .ok_or_else(|| PlanError::SubtaskNotFound(subtask_id.to_string()))?;
        if let Some(title) = title {
            subtask.title = title;
        }
        if let Some(checked) = checked {
            subtask.checked = checked;
        }
        subtask.modified_at = now;
        let updated = subtask.clone();
        task.modified_at = now;
        tx.put_task(plan_id, task)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn delete_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.locks.ensure_writable(plan_id, task_id, actor, now)?;
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        let mut task = snapshot.require_task(task_id)?.clone();
        let before = task.subtasks.len();
        task.subtasks.retain(|s| s.id != subtask_id);
        if task.subtasks.len() == before {
            return Err(PlanError::SubtaskNotFound(subtask_id.to_string()));
        }
        task.modified_at = now;
        tx.put_task(plan_id, task)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()
    }

    /// Add a dependency edge, refusing duplicates and cycles.
    ///
    /// The cycle pre-check walks from the successor: if the predecessor is
    /// reachable, the new edge would close a loop.
    pub fn add_dependency(
        &self,
        plan_id: &str,
        dep: Dependency,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.locks
            .ensure_writable(plan_id, &dep.successor, actor, now)?;
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        snapshot.require_task(&dep.predecessor)?;
        snapshot.require_task(&dep.successor)?;

        let graph = TaskGraph::build(&snapshot)?;
        if graph.would_cycle(&dep.predecessor, &dep.successor) {
            // The loop the edge would close: every path successor..predecessor
            // plus both endpoints.
            let upstream = graph.upstream_closure(&dep.predecessor);
            let mut members: Vec<String> = graph
                .downstream_closure(&dep.successor)
                .into_iter()
                .filter(|id| upstream.contains(id))
                .collect();
            members.push(dep.predecessor.clone());
            members.push(dep.successor.clone());
            members.sort_unstable();
            members.dedup();
            return Err(PlanError::CycleDetected(members));
        }

        tx.add_dependency(plan_id, dep)?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()
    }

    pub fn remove_dependency(
        &self,
        plan_id: &str,
        predecessor: &str,
        successor: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.locks.ensure_writable(plan_id, successor, actor, now)?;
        let mut tx = self.repo.begin()?;
        tx.remove_dependency(plan_id, &predecessor.to_string(), &successor.to_string())?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()
    }

    /// Clone a template into a fresh plan aligned on the target event date.
    ///
    /// All date fields shift uniformly by `target_event - max(source due)`;
    /// progress state resets (NotStarted / 0% / unchecked); ids are
    /// preserved so cross-plan references stay meaningful.
    pub fn clone_template(
        &self,
        source_id: &str,
        target_id: &str,
        target_event: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Plan> {
        let source = self.repo.load_plan(source_id)?;
        let shift = clone_shift(&source, target_event);

        let mut plan = Plan::new(target_id, source.plan.name.clone());
        plan.event_date = Some(target_event);
        plan.created_at = now;
        plan.modified_at = now;

        let mut tx = self.repo.begin()?;
        if tx.plan(target_id).is_ok() {
            return Err(PlanError::Validation(format!(
                "plan '{target_id}' already exists"
            )));
        }
        tx.put_plan(plan.clone())?;
        for bucket in &source.buckets {
            tx.put_bucket(target_id, bucket.clone())?;
        }
        for task in &source.tasks {
            let mut cloned = task.clone();
            cloned.status = TaskStatus::NotStarted;
            cloned.percent_complete = 0;
            cloned.completed = None;
            cloned.completed_by = None;
            cloned.created_at = now;
            cloned.modified_at = now;
            cloned.start = task.start.map(|d| d + shift);
            cloned.due = task.due.map(|d| d + shift);
            for subtask in &mut cloned.subtasks {
                subtask.checked = false;
                subtask.modified_at = now;
            }
            tx.put_task(target_id, cloned)?;
        }
        for dep in &source.dependencies {
            tx.add_dependency(target_id, dep.clone())?;
        }
        refresh_plan_meta(&mut *tx, target_id, now)?;
        tx.commit()?;
        info!(source_id, target_id, "cloned template");
        Ok(plan)
    }
}

/// Uniform clone shift: target event minus the latest due in the source.
fn clone_shift(source: &PlanSnapshot, target_event: DateTime<Utc>) -> Duration {
    match source.tasks.iter().filter_map(|t| t.due).max() {
        Some(latest_due) => target_event - latest_due,
        None => Duration::zero(),
    }
}

/// Apply a patch to a task, enforcing the update-specific invariants the
/// plain [`Task::validate`] cannot see (percent monotonicity, completion
/// bookkeeping).
pub(crate) fn apply_patch(
    task: &mut Task,
    patch: &TaskPatch,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(title) = &patch.title {
        task.title = title.clone();
    }
    if let Some(bucket_id) = &patch.bucket_id {
        task.bucket_id = bucket_id.clone();
    }
    if let Some(percent) = patch.percent_complete {
        if percent < task.percent_complete {
            return Err(PlanError::Validation(format!(
                "task '{}': percent_complete may not decrease ({} -> {percent})",
                task.id, task.percent_complete
            )));
        }
        task.percent_complete = percent;
    }
    if let Some(status) = patch.status {
        transition_status(task, status, actor, now)?;
    } else if task.percent_complete == 100 && task.status != TaskStatus::Completed {
        // Driving percent to 100 without naming a status completes the task.
        transition_status(task, TaskStatus::Completed, actor, now)?;
    }
    if let Some(start) = patch.start {
        task.start = start;
    }
    if let Some(due) = patch.due {
        task.due = due;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(assignees) = &patch.assignees {
        task.assignees = assignees.clone();
    }
    if let Some(categories) = &patch.categories {
        task.categories = categories.clone();
    }
    if let Some(description) = &patch.description {
        task.description = description.clone();
    }
    if let Some(order_hint) = &patch.order_hint {
        task.order_hint = order_hint.clone();
    }
    if let Some(completed_by) = &patch.completed_by {
        task.completed_by = completed_by.clone();
    }
    task.modified_at = now;
    Ok(())
}

fn transition_status(
    task: &mut Task,
    status: TaskStatus,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if task.status == status {
        return Ok(());
    }
    match status {
        TaskStatus::Completed => {
            task.percent_complete = 100;
            task.completed = Some(now);
            if task.completed_by.is_none() {
                task.completed_by = Some(actor.to_string());
            }
        }
        TaskStatus::NotStarted => {
            if task.percent_complete > 0 {
                return Err(PlanError::Validation(format!(
                    "task '{}': cannot return to NotStarted at {}%",
                    task.id, task.percent_complete
                )));
            }
            task.completed = None;
            task.completed_by = None;
        }
        _ => {
            task.completed = None;
            task.completed_by = None;
        }
    }
    task.status = status;
    Ok(())
}

/// Recompute the plan fingerprint and dirty flag after any content write.
pub(crate) fn refresh_plan_meta(
    tx: &mut dyn UnitOfWork,
    plan_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let snapshot = tx.plan(plan_id)?;
    let fingerprint = snapshot.fingerprint();
    let mut plan = snapshot.plan;
    plan.dirty_since_sync = plan
        .synced_fingerprint
        .as_deref()
        .map_or(true, |synced| synced != fingerprint);
    plan.modified_at = now;
    tx.put_plan(plan)
}

fn next_subtask_hint(task: &Task) -> String {
    let last = task
        .subtasks
        .iter()
        .map(|s| s.order_hint.as_str())
        .max();
    confplan_core::ordering::between(last, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use confplan_store::MemoryRepository;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryRepository>, MutationCore) {
        let repo = Arc::new(MemoryRepository::new());
        let locks = LockManager::new(repo.clone());
        let core = MutationCore::new(repo.clone(), locks);
        core.create_plan(Plan::new("p", "Plan"), now()).unwrap();
        (repo, core)
    }

    #[test]
    fn create_update_delete_roundtrip() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "Book venue"), "alice", now())
            .unwrap();

        let patch = TaskPatch {
            percent_complete: Some(40),
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        let updated = core.update_task("p", "t1", &patch, "alice", now()).unwrap();
        assert_eq!(updated.percent_complete, 40);
        assert_eq!(updated.status, TaskStatus::InProgress);

        core.delete_task("p", "t1", "alice", now()).unwrap();
        assert!(repo.load_plan("p").unwrap().tasks.is_empty());
    }

    #[test]
    fn percent_cannot_decrease() {
        let (_, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        core.update_task(
            "p",
            "t1",
            &TaskPatch {
                percent_complete: Some(60),
                status: Some(TaskStatus::InProgress),
                ..TaskPatch::default()
            },
            "alice",
            now(),
        )
        .unwrap();

        let err = core
            .update_task(
                "p",
                "t1",
                &TaskPatch {
                    percent_complete: Some(30),
                    ..TaskPatch::default()
                },
                "alice",
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::Validation(_)));
    }

    #[test]
    fn completing_sets_bookkeeping() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        let done = core
            .update_task(
                "p",
                "t1",
                &TaskPatch {
                    status: Some(TaskStatus::Completed),
                    ..TaskPatch::default()
                },
                "carol",
                now(),
            )
            .unwrap();
        assert_eq!(done.percent_complete, 100);
        assert_eq!(done.completed, Some(now()));
        assert_eq!(done.completed_by, Some("carol".to_string()));

        let snapshot = repo.load_plan("p").unwrap();
        assert!(snapshot.get_task("t1").unwrap().validate().is_ok());
    }

    #[test]
    fn locked_task_rejects_foreign_mutation() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        let locks = LockManager::new(repo);
        locks.acquire("p", "t1", "alice", None, now()).unwrap();

        let err = core
            .update_task(
                "p",
                "t1",
                &TaskPatch {
                    title: Some("hijack".into()),
                    ..TaskPatch::default()
                },
                "bob",
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::LockedByOther { .. }));

        // The holder mutates freely.
        core.update_task(
            "p",
            "t1",
            &TaskPatch {
                title: Some("by holder".into()),
                ..TaskPatch::default()
            },
            "alice",
            now(),
        )
        .unwrap();
    }

    #[test]
    fn subtask_lifecycle() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        core.add_subtask("p", "t1", Subtask::new("s1", "Print list"), "alice", now())
            .unwrap();
        core.add_subtask("p", "t1", Subtask::new("s2", "Check list"), "alice", now())
            .unwrap();

        let updated = core
            .update_subtask("p", "t1", "s1", None, Some(true), "alice", now())
            .unwrap();
        assert!(updated.checked);

        core.delete_subtask("p", "t1", "s2", "alice", now()).unwrap();
        let snapshot = repo.load_plan("p").unwrap();
        let subtasks = &snapshot.get_task("t1").unwrap().subtasks;
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].id, "s1");
    }

    #[test]
    fn subtask_hints_order_appends() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        for i in 0..4 {
            core.add_subtask(
                "p",
                "t1",
                Subtask::new(format!("s{i}"), "item"),
                "alice",
                now(),
            )
            .unwrap();
        }
        let snapshot = repo.load_plan("p").unwrap();
        let hints: Vec<_> = snapshot.get_task("t1").unwrap().subtasks
            .iter()
            .map(|s| s.order_hint.clone())
            .collect();
        for pair in hints.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    /// S6: a back edge is refused, nothing persists.
    #[test]
    fn cycle_refusal_keeps_state() {
        let (repo, core) = setup();
        for id in ["t1", "t2", "t3"] {
            core.create_task("p", Task::new(id, id), "alice", now())
                .unwrap();
        }
        core.add_dependency("p", Dependency::new("t1", "t2"), "alice", now())
            .unwrap();
        core.add_dependency("p", Dependency::new("t2", "t3"), "alice", now())
            .unwrap();

        let err = core
            .add_dependency("p", Dependency::new("t3", "t1"), "alice", now())
            .unwrap_err();
        assert!(matches!(err, PlanError::CycleDetected(_)));

        let snapshot = repo.load_plan("p").unwrap();
        assert_eq!(snapshot.dependencies.len(), 2);
        // The original chain still schedules.
        assert!(TaskGraph::build(&snapshot).is_ok());
    }

    #[test]
    fn duplicate_dependency_rejected() {
        let (_, core) = setup();
        for id in ["t1", "t2"] {
            core.create_task("p", Task::new(id, id), "alice", now())
                .unwrap();
        }
        core.add_dependency("p", Dependency::new("t1", "t2"), "alice", now())
            .unwrap();
        let err = core
            .add_dependency("p", Dependency::new("t1", "t2"), "alice", now())
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateDependency(_, _)));
    }

    #[test]
    fn mutation_marks_plan_dirty() {
        let (repo, core) = setup();
        core.create_task("p", Task::new("t1", "T"), "alice", now())
            .unwrap();
        let plan = repo.load_plan("p").unwrap().plan;
        assert!(plan.dirty_since_sync);
    }

    #[test]
    fn clone_shifts_dates_and_resets_progress() {
        let (repo, core) = setup();
        let start = now();
        let due = now() + Duration::days(10);
        core.create_task(
            "p",
            Task::new("t1", "Build stage")
                .start(start)
                .due(due)
                .subtask(Subtask::new("s1", "Order trusses").checked()),
            "alice",
            now(),
        )
        .unwrap();
        core.update_task(
            "p",
            "t1",
            &TaskPatch {
                status: Some(TaskStatus::Completed),
                ..TaskPatch::default()
            },
            "alice",
            now(),
        )
        .unwrap();

        // Target event 30 days after the source's latest due.
        let target_event = due + Duration::days(30);
        core.clone_template("p", "p2", target_event, now()).unwrap();

        let cloned = repo.load_plan("p2").unwrap();
        let task = cloned.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.percent_complete, 0);
        assert_eq!(task.completed, None);
        assert!(!task.subtasks[0].checked);
        // Uniform shift: every date moved by exactly 30 days.
        assert_eq!(task.due, Some(due + Duration::days(30)));
        assert_eq!(task.start, Some(start + Duration::days(30)));
    }

    #[test]
    fn clone_rejects_existing_target() {
        let (_, core) = setup();
        let err = core
            .clone_template("p", "p", now() + Duration::days(5), now())
            .unwrap_err();
        assert!(matches!(err, PlanError::Validation(_)));
    }
}
