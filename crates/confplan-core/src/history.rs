//! Historical calibration records and Markov transition matrices.
//!
//! Completed past plans contribute [`HistoricalSample`]s, the raw material
//! for PERT calibration; daily [`StateSnapshot`]s feed transition-matrix
//! learning. Both are immutable records: analyzers derive from them, nothing
//! writes them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{BucketId, PlanError, PlanId, Result, TaskId, TaskStatus, UserId};

// ============================================================================
// PERT calibration
// ============================================================================

/// Optimistic / most-likely / pessimistic duration triple, in days.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PertTriple {
    pub optimistic: f64,
    pub most_likely: f64,
    pub pessimistic: f64,
}

/// The default is the triangular 1/3/7-day prior used when no calibration
/// data exists.
impl Default for PertTriple {
    fn default() -> Self {
        Self {
            optimistic: 1.0,
            most_likely: 3.0,
            pessimistic: 7.0,
        }
    }
}

impl PertTriple {
    pub fn new(optimistic: f64, most_likely: f64, pessimistic: f64) -> Result<Self> {
        if !(optimistic <= most_likely && most_likely <= pessimistic) {
            return Err(PlanError::Validation(format!(
                "PERT triple must satisfy O <= M <= P, got ({optimistic}, {most_likely}, {pessimistic})"
            )));
        }
        Ok(Self {
            optimistic,
            most_likely,
            pessimistic,
        })
    }

    /// Beta-PERT mean: (O + 4M + P) / 6.
    pub fn mean(&self) -> f64 {
        (self.optimistic + 4.0 * self.most_likely + self.pessimistic) / 6.0
    }

    /// A triple with zero spread is a point mass at M.
    pub fn is_degenerate(&self) -> bool {
        (self.pessimistic - self.optimistic).abs() < 1e-9
    }
}

/// One completed task from a past plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricalSample {
    /// Plan the sample came from; co-occurrence analysis groups by it
    pub plan_id: PlanId,
    /// Task title, the raw material for implicit-dependency patterns
    pub title: String,
    pub bucket: BucketId,
    /// Optional finer task-type dimension (first applied category)
    pub task_type: Option<String>,
    pub planned_days: f64,
    pub actual_days: f64,
    pub assignees: Vec<UserId>,
    /// Terminal state the task ended in
    pub terminal_status: TaskStatus,
    /// How many times the task entered `Blocked`
    pub block_count: u32,
    /// When work actually began, if recorded
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached its terminal state
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// Markov learning inputs
// ============================================================================

/// One observation of a task's state at a uniform-step snapshot instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Context key, e.g. `bucket:Registration`
    pub context: String,
    pub task_id: TaskId,
    pub recorded_at: DateTime<Utc>,
    pub state: TaskStatus,
}

// ============================================================================
// Transition matrix
// ============================================================================

/// A sparse state-transition matrix for one context.
///
/// Outgoing probabilities from every non-absorbing state sum to 1.0 within
/// [`TransitionMatrix::ROW_SUM_TOLERANCE`]. Absorbing states (`Completed`,
/// `Cancelled`) carry only their self-loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub context: String,
    /// Uniform step size the matrix was learned at, in days
    pub step_days: f64,
    /// (from, to) -> probability; absent entries are 0. Serialized as a
    /// cell list since JSON map keys must be strings.
    #[serde(with = "transition_cells")]
    pub probs: BTreeMap<(TaskStatus, TaskStatus), f64>,
}

mod transition_cells {
    use super::{BTreeMap, TaskStatus};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        probs: &BTreeMap<(TaskStatus, TaskStatus), f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let cells: Vec<(TaskStatus, TaskStatus, f64)> = probs
            .iter()
            .map(|(&(from, to), &p)| (from, to, p))
            .collect();
        cells.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(TaskStatus, TaskStatus), f64>, D::Error> {
        let cells = Vec::<(TaskStatus, TaskStatus, f64)>::deserialize(deserializer)?;
        Ok(cells.into_iter().map(|(from, to, p)| ((from, to), p)).collect())
    }
}

impl TransitionMatrix {
    pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

    pub fn new(context: impl Into<String>, step_days: f64) -> Self {
        Self {
            context: context.into(),
            step_days,
            probs: BTreeMap::new(),
        }
    }

    pub fn get(&self, from: TaskStatus, to: TaskStatus) -> f64 {
        self.probs.get(&(from, to)).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, from: TaskStatus, to: TaskStatus, p: f64) {
        if p > 0.0 {
            self.probs.insert((from, to), p);
        }
    }

    /// Verify the stochastic row-sum invariant on non-absorbing states.
    pub fn validate(&self) -> Result<()> {
        for from in TaskStatus::ALL {
            if from.is_terminal() {
                continue;
            }
            let row_sum: f64 = TaskStatus::ALL.iter().map(|&to| self.get(from, to)).sum();
            if (row_sum - 1.0).abs() > Self::ROW_SUM_TOLERANCE {
                return Err(PlanError::Validation(format!(
                    "transition matrix '{}': row {} sums to {row_sum}, expected 1.0",
                    self.context, from
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pert_triple_ordering_enforced() {
        assert!(PertTriple::new(1.0, 3.0, 7.0).is_ok());
        assert!(PertTriple::new(3.0, 1.0, 7.0).is_err());
        assert!(PertTriple::new(1.0, 5.0, 4.0).is_err());
    }

    #[test]
    fn pert_mean_weighs_most_likely() {
        let triple = PertTriple::new(1.0, 2.0, 3.0).unwrap();
        assert_eq!(triple.mean(), 2.0);
        assert!(!triple.is_degenerate());

        let point = PertTriple::new(4.0, 4.0, 4.0).unwrap();
        assert!(point.is_degenerate());
    }

    #[test]
    fn matrix_row_sum_validation() {
        let mut m = TransitionMatrix::new("bucket:Registration", 1.0);
        for from in TaskStatus::ALL {
            if from.is_terminal() {
                continue;
            }
            m.set(from, from, 0.6);
            m.set(from, TaskStatus::Completed, 0.4);
        }
        assert!(m.validate().is_ok());

        m.set(TaskStatus::Blocked, TaskStatus::Completed, 0.9);
        assert!(m.validate().is_err());
    }

    #[test]
    fn matrix_serde_roundtrip() {
        let mut m = TransitionMatrix::new("bucket:AV", 1.0);
        m.set(TaskStatus::NotStarted, TaskStatus::InProgress, 0.7);
        m.set(TaskStatus::NotStarted, TaskStatus::NotStarted, 0.3);
        let json = serde_json::to_string(&m).unwrap();
        let back: TransitionMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(TaskStatus::NotStarted, TaskStatus::InProgress), 0.7);
        assert_eq!(back.context, "bucket:AV");
    }

    #[test]
    fn matrix_absent_entries_are_zero() {
        let m = TransitionMatrix::new("bucket:Catering", 1.0);
        assert_eq!(m.get(TaskStatus::NotStarted, TaskStatus::InProgress), 0.0);
    }
}
