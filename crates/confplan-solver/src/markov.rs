//! Markov analysis of task state evolution.
//!
//! Three concerns:
//! 1. Map a task to its effective state from status, percent, blocker
//!    presence and review flags.
//! 2. Learn a transition matrix for a context from uniform-step snapshots,
//!    with Laplace smoothing on the non-absorbing rows.
//! 3. Compute expected time (and variance) to absorption in
//!    {Completed, Cancelled} via the fundamental matrix N = (I - Q)^-1.

use std::collections::BTreeMap;

use confplan_core::{StateSnapshot, Task, TaskStatus, TransitionMatrix};

use crate::linalg;

/// Transient states, in matrix row order.
pub const TRANSIENT_STATES: [TaskStatus; 4] = [
    TaskStatus::NotStarted,
    TaskStatus::InProgress,
    TaskStatus::Blocked,
    TaskStatus::UnderReview,
];

/// Laplace smoothing mass added to every non-absorbing transition cell.
pub const LAPLACE_EPSILON: f64 = 0.01;

/// Default snapshot step: one day.
pub const DEFAULT_STEP_DAYS: f64 = 1.0;

// ============================================================================
// State detection
// ============================================================================

/// Effective Markov state of a task.
///
/// Explicit terminal, blocked and review statuses dominate; a not-started
/// task behind an incomplete predecessor counts as blocked; recorded
/// progress promotes a nominally not-started task to in-progress.
pub fn detect_state(task: &Task, has_incomplete_predecessor: bool) -> TaskStatus {
    match task.status {
        TaskStatus::Completed | TaskStatus::Cancelled => task.status,
        TaskStatus::Blocked => TaskStatus::Blocked,
        TaskStatus::UnderReview => TaskStatus::UnderReview,
        TaskStatus::NotStarted if has_incomplete_predecessor => TaskStatus::Blocked,
        TaskStatus::NotStarted if task.percent_complete > 0 => TaskStatus::InProgress,
        TaskStatus::NotStarted => TaskStatus::NotStarted,
        TaskStatus::InProgress => TaskStatus::InProgress,
    }
}

// ============================================================================
// Matrix learning
// ============================================================================

/// Learn a transition matrix from state snapshots of one context.
///
/// Snapshots are grouped per task and ordered in time; each consecutive pair
/// contributes one transition count. Laplace smoothing keeps every
/// non-absorbing row ergodic; absorbing rows carry only the self-loop.
pub fn learn_matrix(
    context: &str,
    snapshots: &[StateSnapshot],
    step_days: f64,
) -> TransitionMatrix {
    let mut by_task: BTreeMap<&str, Vec<&StateSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_task.entry(&snapshot.task_id).or_default().push(snapshot);
    }

    let n = TaskStatus::ALL.len();
    let mut counts = vec![vec![0.0_f64; n]; n];
    for series in by_task.values_mut() {
        series.sort_by_key(|s| s.recorded_at);
        for pair in series.windows(2) {
            counts[pair[0].state.index()][pair[1].state.index()] += 1.0;
        }
    }

    let mut matrix = TransitionMatrix::new(context, step_days);
    for from in TaskStatus::ALL {
        if from.is_terminal() {
            matrix.set(from, from, 1.0);
            continue;
        }
        let smoothed: Vec<f64> = (0..n)
            .map(|to| counts[from.index()][to] + LAPLACE_EPSILON)
            .collect();
        let row_sum: f64 = smoothed.iter().sum();
        for (to_index, mass) in smoothed.iter().enumerate() {
            matrix.set(from, TaskStatus::ALL[to_index], mass / row_sum);
        }
    }
    matrix
}

// ============================================================================
// Absorption analysis
// ============================================================================

/// Expected time to absorption per transient state.
#[derive(Clone, Debug)]
pub struct AbsorptionAnalysis {
    /// Expected days until Completed/Cancelled, indexed like
    /// [`TRANSIENT_STATES`]. NaN when the chain is near-singular.
    pub expected_days: [f64; 4],
    /// Variance of the absorption time, in days squared.
    pub variance_days: [f64; 4],
    /// Set when (I - Q) was near-singular or badly conditioned.
    pub diagnostic: Option<String>,
}

impl AbsorptionAnalysis {
    pub fn expected_days_from(&self, state: TaskStatus) -> Option<f64> {
        TRANSIENT_STATES
            .iter()
            .position(|&s| s == state)
            .map(|i| self.expected_days[i])
    }
}

/// Condition estimates beyond this are reported as near-singular.
const CONDITION_LIMIT: f64 = 1e12;

/// Fundamental-matrix absorption analysis.
///
/// With Q the transient sub-matrix, N = (I - Q)^-1, t = N·1:
/// expected steps from state i is t_i, variance is ((2N - I)t - t∘t)_i.
/// Days scale by the matrix step size.
pub fn absorption_analysis(matrix: &TransitionMatrix) -> AbsorptionAnalysis {
    let k = TRANSIENT_STATES.len();
    let mut i_minus_q = vec![vec![0.0_f64; k]; k];
    for (row, &from) in TRANSIENT_STATES.iter().enumerate() {
        for (col, &to) in TRANSIENT_STATES.iter().enumerate() {
            let identity = if row == col { 1.0 } else { 0.0 };
            i_minus_q[row][col] = identity - matrix.get(from, to);
        }
    }

    let inversion = match linalg::invert(&i_minus_q) {
        Ok(inv) if inv.condition_estimate <= CONDITION_LIMIT => inv,
        Ok(inv) => {
            return AbsorptionAnalysis {
                expected_days: [f64::NAN; 4],
                variance_days: [f64::NAN; 4],
                diagnostic: Some(format!(
                    "(I - Q) is ill-conditioned (estimate {:.2e}); absorption times unreliable",
                    inv.condition_estimate
                )),
            };
        }
        Err(singular) => {
            return AbsorptionAnalysis {
                expected_days: [f64::NAN; 4],
                variance_days: [f64::NAN; 4],
                diagnostic: Some(format!("(I - Q) is singular: {singular}")),
            };
        }
    };

    let fundamental = &inversion.inverse;
    let ones = vec![1.0; k];
    let steps = linalg::mat_vec(fundamental, &ones);

    // Variance of steps: (2N - I)t - t∘t.
    let mut two_n_minus_i = fundamental.clone();
    for (row, values) in two_n_minus_i.iter_mut().enumerate() {
        for (col, value) in values.iter_mut().enumerate() {
            *value *= 2.0;
            if row == col {
                *value -= 1.0;
            }
        }
    }
    let spread = linalg::mat_vec(&two_n_minus_i, &steps);

    let mut expected_days = [0.0_f64; 4];
    let mut variance_days = [0.0_f64; 4];
    for i in 0..k {
        expected_days[i] = steps[i] * matrix.step_days;
        variance_days[i] = (spread[i] - steps[i] * steps[i]).max(0.0)
            * matrix.step_days
            * matrix.step_days;
    }

    AbsorptionAnalysis {
        expected_days,
        variance_days,
        diagnostic: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn detect_state_honours_explicit_status() {
        let blocked = Task::new("t", "t").status(TaskStatus::Blocked);
        assert_eq!(detect_state(&blocked, false), TaskStatus::Blocked);

        let review = Task::new("t", "t").status(TaskStatus::UnderReview);
        assert_eq!(detect_state(&review, true), TaskStatus::UnderReview);
    }

    #[test]
    fn detect_state_blocks_on_incomplete_predecessor() {
        let waiting = Task::new("t", "t");
        assert_eq!(detect_state(&waiting, true), TaskStatus::Blocked);
        assert_eq!(detect_state(&waiting, false), TaskStatus::NotStarted);
    }

    #[test]
    fn detect_state_promotes_partial_progress() {
        let mut task = Task::new("t", "t");
        task.percent_complete = 40;
        assert_eq!(detect_state(&task, false), TaskStatus::InProgress);
    }

    fn snapshot_series(states: &[TaskStatus]) -> Vec<StateSnapshot> {
        let origin = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        states
            .iter()
            .enumerate()
            .map(|(i, &state)| StateSnapshot {
                context: "bucket:Registration".into(),
                task_id: "t1".into(),
                recorded_at: origin + Duration::days(i as i64),
                state,
            })
            .collect()
    }

    #[test]
    fn learned_matrix_rows_are_stochastic() {
        let snapshots = snapshot_series(&[
            TaskStatus::NotStarted,
            TaskStatus::InProgress,
            TaskStatus::InProgress,
            TaskStatus::UnderReview,
            TaskStatus::Completed,
        ]);
        let matrix = learn_matrix("bucket:Registration", &snapshots, 1.0);
        assert!(matrix.validate().is_ok());
        // The dominant InProgress transition was observed twice.
        assert!(
            matrix.get(TaskStatus::InProgress, TaskStatus::InProgress)
                < matrix.get(TaskStatus::NotStarted, TaskStatus::InProgress)
                    + matrix.get(TaskStatus::InProgress, TaskStatus::UnderReview)
        );
    }

    #[test]
    fn smoothing_keeps_unseen_transitions_positive() {
        let snapshots = snapshot_series(&[TaskStatus::NotStarted, TaskStatus::Completed]);
        let matrix = learn_matrix("bucket:Registration", &snapshots, 1.0);
        assert!(matrix.get(TaskStatus::NotStarted, TaskStatus::Blocked) > 0.0);
        assert!(matrix.get(TaskStatus::Blocked, TaskStatus::InProgress) > 0.0);
    }

    #[test]
    fn absorbing_rows_are_self_loops() {
        let matrix = learn_matrix("bucket:Registration", &[], 1.0);
        assert_eq!(matrix.get(TaskStatus::Completed, TaskStatus::Completed), 1.0);
        assert_eq!(matrix.get(TaskStatus::Cancelled, TaskStatus::Cancelled), 1.0);
    }

    /// A chain that completes from InProgress with probability p per step
    /// has expected absorption time 1/p steps.
    #[test]
    fn geometric_chain_expected_time() {
        let mut matrix = TransitionMatrix::new("test", 1.0);
        for from in TRANSIENT_STATES {
            // Every transient state completes with p = 0.25, stays with 0.75.
            matrix.set(from, from, 0.75);
            matrix.set(from, TaskStatus::Completed, 0.25);
        }
        matrix.set(TaskStatus::Completed, TaskStatus::Completed, 1.0);
        matrix.set(TaskStatus::Cancelled, TaskStatus::Cancelled, 1.0);

        let analysis = absorption_analysis(&matrix);
        assert!(analysis.diagnostic.is_none());
        for expected in analysis.expected_days {
            assert!((expected - 4.0).abs() < 1e-9, "expected 4 steps, got {expected}");
        }
        // Geometric variance: (1 - p) / p^2 = 12.
        for variance in analysis.variance_days {
            assert!((variance - 12.0).abs() < 1e-9, "expected variance 12, got {variance}");
        }
    }

    #[test]
    fn absorbing_free_chain_reports_singularity() {
        // No path to absorption: transient states only cycle.
        let mut matrix = TransitionMatrix::new("test", 1.0);
        for from in TRANSIENT_STATES {
            matrix.set(from, from, 1.0);
        }
        matrix.set(TaskStatus::Completed, TaskStatus::Completed, 1.0);
        matrix.set(TaskStatus::Cancelled, TaskStatus::Cancelled, 1.0);

        let analysis = absorption_analysis(&matrix);
        assert!(analysis.diagnostic.is_some());
        assert!(analysis.expected_days[0].is_nan());
    }

    #[test]
    fn step_size_scales_days() {
        let mut matrix = TransitionMatrix::new("test", 0.5);
        for from in TRANSIENT_STATES {
            matrix.set(from, from, 0.5);
            matrix.set(from, TaskStatus::Completed, 0.5);
        }
        let analysis = absorption_analysis(&matrix);
        // 2 expected steps at half-day resolution = 1 day.
        assert!((analysis.expected_days[0] - 1.0).abs() < 1e-9);
    }
}
