//! # confplan-core
//!
//! Core domain model and contracts for the confplan planning engine.
//!
//! This crate provides:
//! - Domain types: `Plan`, `Bucket`, `Task`, `Subtask`, `Dependency`
//! - Workflow types: `ExternalEvent`, `ProposedAction`, `TaskLock`
//! - The `Repository`/`UnitOfWork` persistence contract
//! - Error types and the `Result` alias shared by all engine crates
//!
//! ## Example
//!
//! ```rust
//! use confplan_core::{Plan, Task, TaskStatus, Dependency, DependencyType};
//!
//! let plan = Plan::new("congress-2026", "Annual Congress 2026");
//! let registration = Task::new("t-reg", "Open registration")
//!     .bucket("Registration")
//!     .priority(7)
//!     .assign("alice");
//! let badges = Task::new("t-badges", "Print badges").bucket("Registration");
//! let dep = Dependency::new("t-reg", "t-badges");
//! assert_eq!(dep.dep_type, DependencyType::FinishToStart);
//! assert_eq!(registration.status, TaskStatus::NotStarted);
//! # let _ = (plan, badges);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod fingerprint;
pub mod history;
pub mod ordering;
pub mod repo;
pub mod workflow;

pub use fingerprint::{plan_fingerprint, task_fingerprint};
pub use history::{HistoricalSample, PertTriple, StateSnapshot, TransitionMatrix};
pub use repo::{PlanSnapshot, Repository, UnitOfWork};
pub use workflow::{
    ActionStatus, EventSeverity, ExternalEvent, ProposedAction, TaskLock, DEFAULT_LOCK_TTL_SECS,
};

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique identifier for a plan
pub type PlanId = String;

/// Identifier for a task, stable within its plan
pub type TaskId = String;

/// Identifier for a bucket, unique within its plan
pub type BucketId = String;

/// Identifier for a user
pub type UserId = String;

// ============================================================================
// Plan
// ============================================================================

/// A congress/event program: owns buckets, tasks and dependency edges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier
    pub id: PlanId,
    /// Human-readable name
    pub name: String,
    /// Target event date the program builds toward
    pub event_date: Option<DateTime<Utc>>,
    /// Whether this plan serves as a clonable template
    pub is_template: bool,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub modified_at: DateTime<Utc>,
    /// Instant of the last external sync, if any
    pub previous_sync_at: Option<DateTime<Utc>>,
    /// Plan fingerprint captured at the last sync
    pub synced_fingerprint: Option<String>,
    /// True when the plan content diverged from `synced_fingerprint`
    pub dirty_since_sync: bool,
}

impl Plan {
    /// Create a new plan with the given identifier and name.
    ///
    /// Timestamps default to the UNIX epoch so that construction stays a pure
    /// function; callers stamp real instants on write.
    pub fn new(id: impl Into<PlanId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            event_date: None,
            is_template: false,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            previous_sync_at: None,
            synced_fingerprint: None,
            dirty_since_sync: false,
        }
    }

    /// Set the target event date
    pub fn event_date(mut self, date: DateTime<Utc>) -> Self {
        self.event_date = Some(date);
        self
    }

    /// Mark this plan as a template
    pub fn template(mut self) -> Self {
        self.is_template = true;
        self
    }
}

// ============================================================================
// Bucket
// ============================================================================

/// A workstream/phase grouping tasks; the categorical dimension for
/// calibration and variance analytics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Identifier, unique within the plan
    pub id: BucketId,
    /// Display name
    pub name: String,
    /// Lexicographic order hint
    pub order_hint: String,
}

impl Bucket {
    pub fn new(id: impl Into<BucketId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order_hint: ordering::initial_hint(),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Lifecycle state of a task. `Completed` and `Cancelled` are terminal.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Blocked,
    UnderReview,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// All states, in canonical order. The order is load-bearing for the
    /// Markov transition matrix layout.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::NotStarted,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::UnderReview,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    /// Index into [`TaskStatus::ALL`].
    pub fn index(&self) -> usize {
        match self {
            TaskStatus::NotStarted => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Blocked => 2,
            TaskStatus::UnderReview => 3,
            TaskStatus::Completed => 4,
            TaskStatus::Cancelled => 5,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::NotStarted => write!(f, "Not Started"),
            TaskStatus::InProgress => write!(f, "In Progress"),
            TaskStatus::Blocked => write!(f, "Blocked"),
            TaskStatus::UnderReview => write!(f, "Under Review"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A schedulable unit of work within a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, stable within the plan
    pub id: TaskId,
    /// Display title
    pub title: String,
    /// Owning bucket
    pub bucket_id: BucketId,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Completion percentage, 0-100
    pub percent_complete: u8,
    /// Planned start instant
    pub start: Option<DateTime<Utc>>,
    /// Planned due instant
    pub due: Option<DateTime<Utc>>,
    /// Completion instant; present iff status is `Completed`
    pub completed: Option<DateTime<Utc>>,
    /// Priority 0-10 (higher = more important)
    pub priority: u8,
    /// Assigned users, ordered, no duplicates
    pub assignees: Vec<UserId>,
    /// Applied category labels
    pub categories: BTreeSet<String>,
    /// Free-form description
    pub description: String,
    /// Lexicographic order hint within the bucket
    pub order_hint: String,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub modified_at: DateTime<Utc>,
    /// Creating user
    pub created_by: Option<UserId>,
    /// Completing user
    pub completed_by: Option<UserId>,
    /// Owned checklist items, ordered by hint
    pub subtasks: Vec<Subtask>,
}

impl Task {
    /// Create a new task in the default bucket, not started.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            bucket_id: "default".into(),
            status: TaskStatus::NotStarted,
            percent_complete: 0,
            start: None,
            due: None,
            completed: None,
            priority: 5,
            assignees: Vec::new(),
            categories: BTreeSet::new(),
            description: String::new(),
            order_hint: ordering::initial_hint(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            created_by: None,
            completed_by: None,
            subtasks: Vec::new(),
        }
    }

    /// Set the owning bucket
    pub fn bucket(mut self, bucket_id: impl Into<BucketId>) -> Self {
        self.bucket_id = bucket_id.into();
        self
    }

    /// Set the status. Completion bookkeeping stays with the caller; use
    /// [`Task::completed_at`] when moving to `Completed`.
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the completion percentage
    pub fn percent(mut self, percent: u8) -> Self {
        self.percent_complete = percent;
        self
    }

    /// Set the planned start
    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the planned due instant
    pub fn due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    /// Mark completed at the given instant (also sets status and percent).
    pub fn completed_at(mut self, when: DateTime<Utc>) -> Self {
        self.status = TaskStatus::Completed;
        self.percent_complete = 100;
        self.completed = Some(when);
        self
    }

    /// Set the priority (0-10)
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Append an assignee
    pub fn assign(mut self, user: impl Into<UserId>) -> Self {
        self.assignees.push(user.into());
        self
    }

    /// Add a category label
    pub fn category(mut self, label: impl Into<String>) -> Self {
        self.categories.insert(label.into());
        self
    }

    /// Set the description
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Set the order hint
    pub fn order_hint(mut self, hint: impl Into<String>) -> Self {
        self.order_hint = hint.into();
        self
    }

    /// Append a subtask
    pub fn subtask(mut self, subtask: Subtask) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// Planned duration in fractional days, when both endpoints are present.
    pub fn planned_duration_days(&self) -> Option<f64> {
        match (self.start, self.due) {
            (Some(start), Some(due)) => {
                Some((due - start).num_seconds() as f64 / 86_400.0)
            }
            _ => None,
        }
    }

    /// Whether the task is past due and still open at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due.is_some_and(|due| due < now)
    }

    /// Validate the task invariants enforced on every repository write.
    pub fn validate(&self) -> Result<()> {
        if self.percent_complete > 100 {
            return Err(PlanError::Validation(format!(
                "task '{}': percent_complete {} out of range 0-100",
                self.id, self.percent_complete
            )));
        }
        if self.priority > 10 {
            return Err(PlanError::Validation(format!(
                "task '{}': priority {} out of range 0-10",
                self.id, self.priority
            )));
        }
        if self.status == TaskStatus::NotStarted && self.percent_complete != 0 {
            return Err(PlanError::Validation(format!(
                "task '{}': NotStarted requires percent_complete 0",
                self.id
            )));
        }
        if self.status == TaskStatus::Completed && self.percent_complete != 100 {
            return Err(PlanError::Validation(format!(
                "task '{}': Completed requires percent_complete 100",
                self.id
            )));
        }
        if self.percent_complete == 100 && self.status != TaskStatus::Completed {
            return Err(PlanError::Validation(format!(
                "task '{}': percent_complete 100 requires Completed status",
                self.id
            )));
        }
        if (self.status == TaskStatus::Completed) != self.completed.is_some() {
            return Err(PlanError::Validation(format!(
                "task '{}': completed instant present iff status is Completed",
                self.id
            )));
        }
        if let (Some(start), Some(due)) = (self.start, self.due) {
            if start > due {
                return Err(PlanError::Validation(format!(
                    "task '{}': start {} is after due {}",
                    self.id, start, due
                )));
            }
        }
        let mut seen = BTreeSet::new();
        for user in &self.assignees {
            if !seen.insert(user) {
                return Err(PlanError::Validation(format!(
                    "task '{}': duplicate assignee '{}'",
                    self.id, user
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Subtask
// ============================================================================

/// A checklist item owned by a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub checked: bool,
    pub order_hint: String,
    pub modified_at: DateTime<Utc>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            checked: false,
            order_hint: ordering::initial_hint(),
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }
}

// ============================================================================
// Dependency
// ============================================================================

/// Classical scheduling dependency types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyType {
    /// Finish-to-Start: successor starts after predecessor finishes
    #[default]
    FinishToStart,
    /// Start-to-Start: successor starts no earlier than predecessor starts
    StartToStart,
    /// Finish-to-Finish: successor finishes no earlier than predecessor finishes
    FinishToFinish,
    /// Start-to-Finish: successor finishes no earlier than predecessor starts
    StartToFinish,
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::FinishToStart => write!(f, "FS"),
            DependencyType::StartToStart => write!(f, "SS"),
            DependencyType::FinishToFinish => write!(f, "FF"),
            DependencyType::StartToFinish => write!(f, "SF"),
        }
    }
}

/// A directed edge of the plan's dependency DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Predecessor task id
    pub predecessor: TaskId,
    /// Successor task id
    pub successor: TaskId,
    /// Dependency type (FS by default)
    pub dep_type: DependencyType,
}

impl Dependency {
    /// Create a Finish-to-Start edge.
    pub fn new(predecessor: impl Into<TaskId>, successor: impl Into<TaskId>) -> Self {
        Self {
            predecessor: predecessor.into(),
            successor: successor.into(),
            dep_type: DependencyType::FinishToStart,
        }
    }

    pub fn typed(mut self, dep_type: DependencyType) -> Self {
        self.dep_type = dep_type;
        self
    }
}

// ============================================================================
// Partial updates
// ============================================================================

/// Partial task update applied by the mutation core. `None` leaves the field
/// untouched; `Some(None)` on an optional field clears it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub bucket_id: Option<BucketId>,
    pub status: Option<TaskStatus>,
    pub percent_complete: Option<u8>,
    pub start: Option<Option<DateTime<Utc>>>,
    pub due: Option<Option<DateTime<Utc>>>,
    pub priority: Option<u8>,
    pub assignees: Option<Vec<UserId>>,
    pub categories: Option<BTreeSet<String>>,
    pub description: Option<String>,
    pub order_hint: Option<String>,
    pub completed_by: Option<Option<UserId>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.bucket_id.is_none()
            && self.status.is_none()
            && self.percent_complete.is_none()
            && self.start.is_none()
            && self.due.is_none()
            && self.priority.is_none()
            && self.assignees.is_none()
            && self.categories.is_none()
            && self.description.is_none()
            && self.order_hint.is_none()
            && self.completed_by.is_none()
    }
}

/// A hypothetical edit evaluated by the impact analyzer. Pure preview input;
/// never persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProposedChange {
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub assignees: Option<Vec<UserId>>,
    pub percent_complete: Option<u8>,
    /// Explicit slip applied to the task's duration, in days
    pub slippage_days: Option<f64>,
}

// ============================================================================
// Errors
// ============================================================================

/// Coarse error classification used by transports and the CLI exit mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Cycle,
    Calibration,
    Cancelled,
    Internal,
}

/// Unified error taxonomy for the engine.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("subtask not found: {0}")]
    SubtaskNotFound(String),

    #[error("dependency not found: {0} -> {1}")]
    DependencyNotFound(TaskId, TaskId),

    #[error("event not found: {0}")]
    EventNotFound(i64),

    #[error("proposed action not found: {0}")]
    ActionNotFound(i64),

    #[error("duplicate dependency: {0} -> {1}")]
    DuplicateDependency(TaskId, TaskId),

    #[error("task '{task}' is locked by '{holder}' since {acquired_at}")]
    LockedByOther {
        task: TaskId,
        holder: UserId,
        acquired_at: DateTime<Utc>,
    },

    #[error("lock on task '{0}' is not held by the caller")]
    NotHolder(TaskId),

    #[error("proposed action {0} was already decided")]
    ActionAlreadyDecided(i64),

    #[error("cycle detected involving tasks: {0:?}")]
    CycleDetected(Vec<TaskId>),

    #[error("no calibration data for bucket '{0}' and no fallback enabled")]
    InsufficientCalibration(BucketId),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error [{correlation_id}]")]
    Internal { correlation_id: String },
}

impl PlanError {
    /// Map to the coarse §-level kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Validation(_) => ErrorKind::Validation,
            PlanError::PlanNotFound(_)
            | PlanError::TaskNotFound(_)
            | PlanError::SubtaskNotFound(_)
            | PlanError::DependencyNotFound(_, _)
            | PlanError::EventNotFound(_)
            | PlanError::ActionNotFound(_) => ErrorKind::NotFound,
            PlanError::DuplicateDependency(_, _)
            | PlanError::LockedByOther { .. }
            | PlanError::NotHolder(_)
            | PlanError::ActionAlreadyDecided(_) => ErrorKind::Conflict,
            PlanError::CycleDetected(_) => ErrorKind::Cycle,
            PlanError::InsufficientCalibration(_) => ErrorKind::Calibration,
            PlanError::Cancelled => ErrorKind::Cancelled,
            PlanError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, PlanError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn task_builder() {
        let task = Task::new("t1", "Book venue")
            .bucket("Logistics")
            .priority(8)
            .assign("alice")
            .assign("bob")
            .category("venue")
            .due(day(10));

        assert_eq!(task.id, "t1");
        assert_eq!(task.bucket_id, "Logistics");
        assert_eq!(task.priority, 8);
        assert_eq!(task.assignees, vec!["alice", "bob"]);
        assert!(task.categories.contains("venue"));
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.percent_complete, 0);
    }

    #[test]
    fn validate_accepts_well_formed_task() {
        let task = Task::new("t1", "ok").start(day(1)).due(day(5));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn validate_rejects_start_after_due() {
        let task = Task::new("t1", "bad").start(day(5)).due(day(1));
        let err = task.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn validate_rejects_percent_status_mismatch() {
        let task = Task::new("t1", "bad").percent(30);
        assert!(task.validate().is_err());

        let task = Task::new("t1", "bad").status(TaskStatus::Completed).percent(100);
        // Completed without a completion instant
        assert!(task.validate().is_err());

        let task = Task::new("t1", "ok").completed_at(day(3));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_assignees() {
        let task = Task::new("t1", "bad").assign("alice").assign("alice");
        assert!(task.validate().is_err());
    }

    #[test]
    fn completed_instant_iff_completed_status() {
        let mut task = Task::new("t1", "x").completed_at(day(2));
        assert!(task.validate().is_ok());
        task.status = TaskStatus::InProgress;
        assert!(task.validate().is_err());
    }

    #[test]
    fn planned_duration_requires_both_endpoints() {
        let task = Task::new("t1", "x").start(day(1)).due(day(4));
        assert_eq!(task.planned_duration_days(), Some(3.0));
        assert_eq!(Task::new("t2", "y").planned_duration_days(), None);
    }

    #[test]
    fn overdue_excludes_terminal_states() {
        let now = day(10);
        let open = Task::new("t1", "x").due(day(5));
        assert!(open.is_overdue(now));

        let done = Task::new("t2", "y").due(day(5)).completed_at(day(6));
        assert!(!done.is_overdue(now));
    }

    #[test]
    fn status_display_and_index_roundtrip() {
        for (i, status) in TaskStatus::ALL.iter().enumerate() {
            assert_eq!(status.index(), i);
        }
        assert_eq!(format!("{}", TaskStatus::UnderReview), "Under Review");
    }

    #[test]
    fn dependency_defaults_to_fs() {
        let dep = Dependency::new("a", "b");
        assert_eq!(dep.dep_type, DependencyType::FinishToStart);
        assert_eq!(format!("{}", dep.dep_type), "FS");

        let ss = Dependency::new("a", "b").typed(DependencyType::StartToStart);
        assert_eq!(format!("{}", ss.dep_type), "SS");
    }

    #[test]
    fn empty_patch_detection() {
        assert!(TaskPatch::default().is_empty());
        let patch = TaskPatch {
            title: Some("new".into()),
            ..TaskPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn error_kind_mapping() {
        assert_eq!(PlanError::TaskNotFound("t".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            PlanError::DuplicateDependency("a".into(), "b".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PlanError::CycleDetected(vec!["a".into()]).kind(),
            ErrorKind::Cycle
        );
        assert_eq!(PlanError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
