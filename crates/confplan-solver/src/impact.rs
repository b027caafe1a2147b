//! Impact analysis: "what happens if we change this task?"
//!
//! A pure preview. The proposed change is applied to an in-memory copy of
//! the snapshot, the critical path is recomputed, and optionally a seeded
//! low-iteration simulation quantifies the probabilistic shift. Nothing is
//! persisted; identical inputs give identical answers.

use std::collections::BTreeSet;

use confplan_core::{PlanSnapshot, ProposedChange, Result, TaskId};

use crate::cancel::CancelToken;
use crate::cpm::{self, CpmSchedule, DurationModel, SLACK_EPSILON};
use crate::graph::TaskGraph;
use crate::history::Calibration;
use crate::montecarlo::{self, SimulationParams};

/// Deterministic part of an impact preview.
#[derive(Clone, Debug)]
pub struct ImpactReport {
    pub task_id: TaskId,
    /// Transitive successors of the changed task.
    pub downstream: BTreeSet<TaskId>,
    /// Tasks whose earliest finish moved by more than epsilon, the changed
    /// task included.
    pub affected: BTreeSet<TaskId>,
    /// Shift of the plan end, in days (positive = later).
    pub plan_end_delta_days: f64,
    /// Human-readable summary.
    pub message: String,
    /// Probabilistic deltas, when a simulation was requested.
    pub simulated: Option<SimulatedImpact>,
}

/// Simulated deltas between the changed and the baseline plan.
#[derive(Clone, Debug)]
pub struct SimulatedImpact {
    pub p50_delta_days: f64,
    pub p95_delta_days: f64,
    pub on_time_probability_delta_pct: Option<f64>,
}

/// Iterations used for preview simulations.
pub const PREVIEW_ITERATIONS: usize = 1_000;

/// Analyze the impact of a proposed change.
///
/// `with_simulation` additionally runs two seeded [`PREVIEW_ITERATIONS`]
/// simulations (baseline and changed) and reports the percentile deltas.
pub fn analyze(
    snapshot: &PlanSnapshot,
    calibration: &Calibration,
    task_id: &str,
    change: &ProposedChange,
    with_simulation: Option<&SimulationParams>,
    token: &CancelToken,
) -> Result<ImpactReport> {
    snapshot.require_task(task_id)?;
    let graph = TaskGraph::build(snapshot)?;

    let model = DurationModel::new(calibration.pert_by_bucket.clone());
    let baseline = cpm::compute(snapshot, &graph, &model);

    let changed_snapshot = overlay(snapshot, task_id, change)?;
    let mut changed_model = model.clone();
    if let Some(slip) = change.slippage_days {
        let base = changed_snapshot
            .require_task(task_id)
            .map(|t| changed_model.estimate(t))?;
        changed_model
            .overrides
            .insert(task_id.to_string(), (base + slip).max(0.0));
    }
    let changed = cpm::compute(&changed_snapshot, &graph, &changed_model);

    let downstream = graph.downstream_closure(task_id);
    let affected = moved_tasks(&baseline, &changed);
    let plan_end_delta_days = changed.plan_end_days - baseline.plan_end_days;

    let message = format!(
        "shifts the plan end by {:.1} day(s); {} of {} downstream task(s) move",
        plan_end_delta_days,
        affected.iter().filter(|t| downstream.contains(*t)).count(),
        downstream.len(),
    );

    let simulated = match with_simulation {
        Some(params) => {
            let mut preview = params.clone();
            preview.iterations = preview.iterations.min(PREVIEW_ITERATIONS);
            let base_run =
                montecarlo::simulate(snapshot, &graph, calibration, &preview, token)?;
            let mut changed_params = preview.clone();
            if let Some(slip) = change.slippage_days {
                let base = changed_model
                    .overrides
                    .get(task_id)
                    .copied()
                    .unwrap_or(slip);
                changed_params.overrides.insert(task_id.to_string(), base);
            }
            let changed_run = montecarlo::simulate(
                &changed_snapshot,
                &graph,
                calibration,
                &changed_params,
                token,
            )?;
            Some(SimulatedImpact {
                p50_delta_days: changed_run.end.p50 - base_run.end.p50,
                p95_delta_days: changed_run.end.p95 - base_run.end.p95,
                on_time_probability_delta_pct: match (
                    changed_run.on_time_probability_pct,
                    base_run.on_time_probability_pct,
                ) {
                    (Some(after), Some(before)) => Some(after - before),
                    _ => None,
                },
            })
        }
        None => None,
    };

    Ok(ImpactReport {
        task_id: task_id.to_string(),
        downstream,
        affected,
        plan_end_delta_days,
        message,
        simulated,
    })
}

/// Apply the change to a copy of the snapshot.
fn overlay(
    snapshot: &PlanSnapshot,
    task_id: &str,
    change: &ProposedChange,
) -> Result<PlanSnapshot> {
    let mut copy = snapshot.clone();
    let task = copy
        .tasks
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| confplan_core::PlanError::TaskNotFound(task_id.to_string()))?;
    if let Some(start) = change.start {
        task.start = Some(start);
    }
    if let Some(due) = change.due {
        task.due = Some(due);
    }
    if let Some(assignees) = &change.assignees {
        task.assignees = assignees.clone();
    }
    if let Some(percent) = change.percent_complete {
        task.percent_complete = percent.min(100);
    }
    Ok(copy)
}

fn moved_tasks(baseline: &CpmSchedule, changed: &CpmSchedule) -> BTreeSet<TaskId> {
    changed
        .results
        .iter()
        .filter(|(id, result)| {
            baseline
                .results
                .get(*id)
                .map_or(true, |base| {
                    (result.early_finish - base.early_finish).abs() > SLACK_EPSILON
                })
        })
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use confplan_core::{Dependency, PertTriple, Plan, Task};
    use pretty_assertions::assert_eq;

    fn origin() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
    }

    /// Linear chain t1 -> t2 -> t3 with dated durations 2/3/4 days.
    fn chain() -> (PlanSnapshot, Calibration) {
        let t0 = origin();
        let snapshot = PlanSnapshot {
            plan: Plan::new("p", "Plan"),
            buckets: Vec::new(),
            tasks: vec![
                Task::new("t1", "t1").start(t0).due(t0 + Duration::days(2)),
                Task::new("t2", "t2").start(t0).due(t0 + Duration::days(3)),
                Task::new("t3", "t3").start(t0).due(t0 + Duration::days(4)),
            ],
            dependencies: vec![Dependency::new("t1", "t2"), Dependency::new("t2", "t3")],
        };
        (snapshot, Calibration::default())
    }

    #[test]
    fn slippage_shifts_downstream() {
        let (snapshot, calibration) = chain();
        let change = ProposedChange {
            slippage_days: Some(3.0),
            ..ProposedChange::default()
        };
        let report = analyze(
            &snapshot,
            &calibration,
            "t2",
            &change,
            None,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.plan_end_delta_days, 3.0);
        let affected: Vec<_> = report.affected.iter().cloned().collect();
        assert_eq!(affected, vec!["t2", "t3"]);
        let downstream: Vec<_> = report.downstream.iter().cloned().collect();
        assert_eq!(downstream, vec!["t3"]);
        assert!(report.message.contains("3.0 day(s)"));
    }

    #[test]
    fn preview_does_not_mutate_input() {
        let (snapshot, calibration) = chain();
        let before = snapshot.fingerprint();
        let change = ProposedChange {
            slippage_days: Some(2.0),
            ..ProposedChange::default()
        };
        analyze(
            &snapshot,
            &calibration,
            "t2",
            &change,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(snapshot.fingerprint(), before);
    }

    #[test]
    fn idempotent_for_identical_inputs() {
        let (snapshot, calibration) = chain();
        let change = ProposedChange {
            due: Some(origin() + Duration::days(9)),
            slippage_days: Some(1.5),
            ..ProposedChange::default()
        };
        let first = analyze(
            &snapshot,
            &calibration,
            "t1",
            &change,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        let second = analyze(
            &snapshot,
            &calibration,
            "t1",
            &change,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(first.plan_end_delta_days, second.plan_end_delta_days);
        assert_eq!(first.affected, second.affected);
    }

    #[test]
    fn unknown_task_fails() {
        let (snapshot, calibration) = chain();
        let err = analyze(
            &snapshot,
            &calibration,
            "ghost",
            &ProposedChange::default(),
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, confplan_core::PlanError::TaskNotFound(_)));
    }

    #[test]
    fn simulated_delta_tracks_slippage() {
        let (snapshot, mut calibration) = chain();
        // Degenerate PERT so the simulated delta is exact.
        calibration.pert_by_bucket.insert(
            "default".into(),
            PertTriple {
                optimistic: 2.0,
                most_likely: 2.0,
                pessimistic: 2.0,
            },
        );
        let change = ProposedChange {
            slippage_days: Some(2.0),
            ..ProposedChange::default()
        };
        let params = SimulationParams::new(origin()).iterations(200).seed(17);
        let report = analyze(
            &snapshot,
            &calibration,
            "t2",
            &change,
            Some(&params),
            &CancelToken::new(),
        )
        .unwrap();
        let simulated = report.simulated.expect("simulation requested");
        assert_eq!(simulated.p50_delta_days, 2.0);
        assert_eq!(simulated.p95_delta_days, 2.0);
    }

    #[test]
    fn date_only_change_moves_estimates() {
        let (snapshot, calibration) = chain();
        // Stretch t2's window from 3 to 6 days.
        let change = ProposedChange {
            due: Some(origin() + Duration::days(6)),
            ..ProposedChange::default()
        };
        let report = analyze(
            &snapshot,
            &calibration,
            "t2",
            &change,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.plan_end_delta_days, 3.0);
        assert!(report.affected.contains("t2"));
        assert!(report.affected.contains("t3"));
    }
}
