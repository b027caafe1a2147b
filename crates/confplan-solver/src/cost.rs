//! Weighted schedule-cost model.
//!
//! A pure derivation translating the plan into comparable day-score units:
//! estimated task-days per bucket, plus penalties for blocked and overdue
//! tasks. Weights are caller-supplied so different programs can price risk
//! differently.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confplan_core::{BucketId, PlanSnapshot, TaskStatus};

use crate::cpm::DurationModel;

/// Cost weights, in day-score units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CostWeights {
    /// Cost of one estimated task-day.
    pub per_task_day: f64,
    /// Flat penalty per currently blocked task.
    pub blocked_penalty: f64,
    /// Penalty per day a task is overdue.
    pub overdue_penalty_per_day: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            per_task_day: 1.0,
            blocked_penalty: 2.0,
            overdue_penalty_per_day: 1.5,
        }
    }
}

/// Per-bucket slice of the breakdown.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketCost {
    pub task_count: usize,
    pub duration_days: f64,
    pub blocked_tasks: usize,
    pub overdue_days: f64,
    pub weighted_cost: f64,
}

/// The full cost breakdown.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub per_bucket: BTreeMap<BucketId, BucketCost>,
    pub total: f64,
}

/// Compute the weighted breakdown for a plan.
pub fn compute(
    snapshot: &PlanSnapshot,
    model: &DurationModel,
    weights: &CostWeights,
    now: DateTime<Utc>,
) -> CostBreakdown {
    let mut breakdown = CostBreakdown::default();
    for task in &snapshot.tasks {
        let entry = breakdown
            .per_bucket
            .entry(task.bucket_id.clone())
            .or_default();
        entry.task_count += 1;
        entry.duration_days += model.estimate(task);
        if task.status == TaskStatus::Blocked {
            entry.blocked_tasks += 1;
        }
        if task.is_overdue(now) {
            if let Some(due) = task.due {
                entry.overdue_days += (now - due).num_seconds() as f64 / 86_400.0;
            }
        }
    }
    for cost in breakdown.per_bucket.values_mut() {
        cost.weighted_cost = cost.duration_days * weights.per_task_day
            + cost.blocked_tasks as f64 * weights.blocked_penalty
            + cost.overdue_days * weights.overdue_penalty_per_day;
        breakdown.total += cost.weighted_cost;
    }
    breakdown
}
