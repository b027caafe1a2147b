//! External-event ingestion and the proposed-action decision workflow.
//!
//! Rules are table-driven: each `event_type` maps to a function deriving
//! zero or more action drafts from the event. Unknown event types persist
//! the event and derive nothing. A decision is terminal; approval applies
//! the implied task mutation in the same transaction that flips the status,
//! so the mutation and the decision are visible in one snapshot or not at
//! all.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use confplan_core::{
    ActionStatus, ExternalEvent, PlanError, ProposedAction, Repository, Result, TaskPatch,
    UnitOfWork,
};

use crate::locks::LockManager;
use crate::mutation::{apply_patch, refresh_plan_meta};

/// Derives action drafts from an event.
pub type EventRule = fn(&ExternalEvent) -> Vec<ActionDraft>;

/// A not-yet-persisted proposed action.
#[derive(Clone, Debug)]
pub struct ActionDraft {
    pub task_id: String,
    pub action_type: String,
    pub title: String,
    pub description: String,
    pub payload: Map<String, Value>,
}

/// The rule table keyed by `event_type`.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, EventRule>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The reference rule set.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register("flight_cancellation", flight_cancellation_rule);
        registry.register("participant_meeting_cancelled", meeting_cancelled_rule);
        registry
    }

    pub fn register(&mut self, event_type: &str, rule: EventRule) {
        self.rules.insert(event_type.to_string(), rule);
    }

    fn derive(&self, event: &ExternalEvent) -> Vec<ActionDraft> {
        match self.rules.get(&event.event_type) {
            Some(rule) => rule(event),
            None => {
                info!(event_type = %event.event_type, "no rule for event type");
                Vec::new()
            }
        }
    }
}

/// `flight_cancellation` with `{shift_days: k}`: shift every affected
/// task's due date by k days (k >= 1).
fn flight_cancellation_rule(event: &ExternalEvent) -> Vec<ActionDraft> {
    let shift_days = event
        .payload
        .get("shift_days")
        .and_then(Value::as_i64)
        .unwrap_or(1)
        .max(1);
    event
        .affected_task_ids
        .iter()
        .map(|task_id| {
            let mut payload = Map::new();
            payload.insert("shift_days".into(), Value::from(shift_days));
            ActionDraft {
                task_id: task_id.clone(),
                action_type: "shift_due_date".into(),
                title: format!("Shift '{task_id}' by {shift_days} day(s)"),
                description: format!(
                    "Flight cancellation '{}' delays this task by {shift_days} day(s)",
                    event.title
                ),
                payload,
            }
        })
        .collect()
}

/// `participant_meeting_cancelled`: flag each affected task for reassignment
/// or rescheduling; the payload records the reason for the decider.
fn meeting_cancelled_rule(event: &ExternalEvent) -> Vec<ActionDraft> {
    event
        .affected_task_ids
        .iter()
        .map(|task_id| {
            let mut payload = Map::new();
            payload.insert("reason".into(), Value::from(event.title.clone()));
            ActionDraft {
                task_id: task_id.clone(),
                action_type: "reassign_or_reschedule".into(),
                title: format!("Reassign or reschedule '{task_id}'"),
                description: format!("Participant meeting cancelled: {}", event.title),
                payload,
            }
        })
        .collect()
}

/// The workflow engine.
#[derive(Clone)]
pub struct EventWorkflow {
    repo: Arc<dyn Repository>,
    locks: LockManager,
    rules: RuleRegistry,
}

impl EventWorkflow {
    pub fn new(repo: Arc<dyn Repository>, locks: LockManager, rules: RuleRegistry) -> Self {
        Self { repo, locks, rules }
    }

    /// Persist an event and the actions its rule derives, in one
    /// transaction. Returns the stored event and actions.
    pub fn ingest(
        &self,
        plan_id: &str,
        mut event: ExternalEvent,
        now: DateTime<Utc>,
    ) -> Result<(ExternalEvent, Vec<ProposedAction>)> {
        let mut tx = self.repo.begin()?;
        let snapshot = tx.plan(plan_id)?;
        // Affected tasks must exist; a dangling id is a caller bug worth
        // surfacing, not silently dropping.
        for task_id in &event.affected_task_ids {
            snapshot.require_task(task_id)?;
        }

        event.plan_id = plan_id.to_string();
        event.id = tx.next_event_id(plan_id)?;
        event.created_at = now;

        let drafts = self.rules.derive(&event);
        let mut actions = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut action = ProposedAction::new(plan_id, draft.task_id, draft.action_type);
            action.id = tx.next_action_id(plan_id)?;
            action.event_id = Some(event.id);
            action.title = draft.title;
            action.description = draft.description;
            action.payload = draft.payload;
            action.created_at = now;
            tx.put_action(action.clone())?;
            actions.push(action);
        }
        tx.put_event(event.clone())?;
        tx.commit()?;
        info!(plan_id, event_id = event.id, derived = actions.len(), "ingested event");
        Ok((event, actions))
    }

    /// Approve an action: apply the implied mutation and flip the status in
    /// one transaction. Idempotent on already-approved actions.
    pub fn approve(
        &self,
        plan_id: &str,
        action_id: i64,
        decider: &str,
        now: DateTime<Utc>,
    ) -> Result<ProposedAction> {
        let mut tx = self.repo.begin()?;
        let mut action = tx.get_action(plan_id, action_id)?;
        match action.status {
            ActionStatus::Approved => return Ok(action),
            ActionStatus::Rejected => return Err(PlanError::ActionAlreadyDecided(action_id)),
            ActionStatus::Pending => {}
        }
        self.locks
            .ensure_writable(plan_id, &action.task_id, decider, now)?;

        apply_action(&mut *tx, plan_id, &action, decider, now)?;

        action.status = ActionStatus::Approved;
        action.decided_at = Some(now);
        action.decided_by = Some(decider.to_string());
        tx.put_action(action.clone())?;
        refresh_plan_meta(&mut *tx, plan_id, now)?;
        tx.commit()?;
        info!(plan_id, action_id, decider, "approved action");
        Ok(action)
    }

    /// Reject an action. Terminal; rejecting an approved action (or
    /// re-rejecting) fails with `ActionAlreadyDecided`.
    pub fn reject(
        &self,
        plan_id: &str,
        action_id: i64,
        decider: &str,
        now: DateTime<Utc>,
    ) -> Result<ProposedAction> {
        let mut tx = self.repo.begin()?;
        let mut action = tx.get_action(plan_id, action_id)?;
        if action.status.is_decided() {
            return Err(PlanError::ActionAlreadyDecided(action_id));
        }
        action.status = ActionStatus::Rejected;
        action.decided_at = Some(now);
        action.decided_by = Some(decider.to_string());
        tx.put_action(action.clone())?;
        tx.commit()?;
        Ok(action)
    }

    /// Remove an action row entirely (distinct from rejecting it).
    pub fn delete_action(&self, plan_id: &str, action_id: i64) -> Result<()> {
        let mut tx = self.repo.begin()?;
        tx.delete_action(plan_id, action_id)?;
        tx.commit()
    }

    /// Remove an event row. Derived actions stay; they reference the event
    /// by id only.
    pub fn delete_event(&self, plan_id: &str, event_id: i64) -> Result<()> {
        let mut tx = self.repo.begin()?;
        tx.delete_event(plan_id, event_id)?;
        tx.commit()
    }
}

/// Translate an approved action's payload into the task mutation it implies
/// and apply it inside the open transaction.
fn apply_action(
    tx: &mut dyn UnitOfWork,
    plan_id: &str,
    action: &ProposedAction,
    decider: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let snapshot = tx.plan(plan_id)?;
    let mut task = snapshot.require_task(&action.task_id)?.clone();

    match action.action_type.as_str() {
        "shift_due_date" => {
            let shift_days = action
                .payload
                .get("shift_days")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    PlanError::Validation(format!(
                        "action {}: shift_due_date requires a shift_days payload",
                        action.id
                    ))
                })?;
            let due = task.due.ok_or_else(|| {
                PlanError::Validation(format!(
                    "task '{}' has no due date to shift",
                    task.id
                ))
            })?;
            let patch = TaskPatch {
                due: Some(Some(due + Duration::days(shift_days))),
                ..TaskPatch::default()
            };
            apply_patch(&mut task, &patch, decider, now)?;
        }
        "reassign_or_reschedule" => {
            let mut patch = TaskPatch::default();
            if let Some(assignee) = action.payload.get("assignee").and_then(Value::as_str) {
                patch.assignees = Some(vec![assignee.to_string()]);
            }
            if let Some(shift_days) = action.payload.get("shift_days").and_then(Value::as_i64) {
                if let Some(due) = task.due {
                    patch.due = Some(Some(due + Duration::days(shift_days)));
                }
            }
            if patch.is_empty() {
                // Nothing concrete in the payload: the approval records the
                // decision without touching the task.
                warn!(action_id = action.id, "reassign_or_reschedule with empty payload");
                return Ok(());
            }
            apply_patch(&mut task, &patch, decider, now)?;
        }
        other => {
            return Err(PlanError::Validation(format!(
                "unknown action type '{other}'"
            )));
        }
    }

    task.validate()?;
    tx.put_task(plan_id, task)
}
