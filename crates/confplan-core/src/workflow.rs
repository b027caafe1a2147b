//! External events, proposed actions and task locks.
//!
//! These types back the human-in-the-loop workflow: an external event is
//! ingested, rules derive zero or more proposed actions, and a human decides
//! each action. Locks guard tasks against concurrent mutation while a
//! decision is in flight.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{PlanId, TaskId, UserId};

/// Default advisory-lock time-to-live: 15 minutes.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 15 * 60;

// ============================================================================
// External events
// ============================================================================

/// Severity of an external event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Low => write!(f, "low"),
            EventSeverity::Medium => write!(f, "medium"),
            EventSeverity::High => write!(f, "high"),
            EventSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Something that happened outside the plan and may require schedule changes
/// (a cancelled flight, a dropped speaker slot, a venue change).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExternalEvent {
    /// Monotonic identifier within the plan
    pub id: i64,
    pub plan_id: PlanId,
    /// Free enumeration, e.g. `flight_cancellation`
    pub event_type: String,
    pub title: String,
    pub description: String,
    pub severity: EventSeverity,
    /// Tasks the event touches
    pub affected_task_ids: Vec<TaskId>,
    /// Opaque payload interpreted by the action rules
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl ExternalEvent {
    pub fn new(plan_id: impl Into<PlanId>, event_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            plan_id: plan_id.into(),
            event_type: event_type.into(),
            title: String::new(),
            description: String::new(),
            severity: EventSeverity::Medium,
            affected_task_ids: Vec::new(),
            payload: Map::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            acknowledged_at: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn affecting(mut self, task_id: impl Into<TaskId>) -> Self {
        self.affected_task_ids.push(task_id.into());
        self
    }

    pub fn payload_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Proposed actions
// ============================================================================

/// Decision state of a proposed action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ActionStatus {
    pub fn is_decided(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }
}

/// A rule-generated candidate mutation awaiting a human decision.
///
/// Lifecycle: created pending by event ingestion; terminal on approve,
/// reject or delete. Approval applies the implied mutation in the same
/// transaction as the status flip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposedAction {
    pub id: i64,
    pub plan_id: PlanId,
    /// Originating event, when rule-derived
    pub event_id: Option<i64>,
    /// Target task
    pub task_id: TaskId,
    /// e.g. `shift_due_date`, `reassign_or_reschedule`
    pub action_type: String,
    pub title: String,
    pub description: String,
    /// Opaque payload, e.g. `{"shift_days": 2}`
    pub payload: Map<String, Value>,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
}

impl ProposedAction {
    pub fn new(
        plan_id: impl Into<PlanId>,
        task_id: impl Into<TaskId>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            plan_id: plan_id.into(),
            event_id: None,
            task_id: task_id.into(),
            action_type: action_type.into(),
            title: String::new(),
            description: String::new(),
            payload: Map::new(),
            status: ActionStatus::Pending,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            decided_at: None,
            decided_by: None,
        }
    }
}

// ============================================================================
// Task locks
// ============================================================================

/// An advisory per-task lock with holder and TTL. At most one lock exists per
/// (plan, task); expiry is evaluated lazily against a caller-supplied `now`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLock {
    pub plan_id: PlanId,
    pub task_id: TaskId,
    pub holder: UserId,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl TaskLock {
    pub fn new(
        plan_id: impl Into<PlanId>,
        task_id: impl Into<TaskId>,
        holder: impl Into<UserId>,
        acquired_at: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            task_id: task_id.into(),
            holder: holder.into(),
            acquired_at,
            ttl_secs,
        }
    }

    /// The lock is expired once `acquired_at + ttl` lies strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.acquired_at + Duration::seconds(self.ttl_secs) < now
    }
}
