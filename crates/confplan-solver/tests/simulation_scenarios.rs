//! Monte Carlo scenario tests: seeded determinism, branch probabilities and
//! the simulated-vs-deterministic ordering invariant.

use chrono::{TimeZone, Utc};
use confplan_core::{Dependency, PertTriple, Plan, PlanSnapshot, Task};
use confplan_solver::graph::TaskGraph;
use confplan_solver::montecarlo::{self, SimulationParams};
use confplan_solver::{CancelToken, Calibration};

fn origin() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
}

fn pert(o: f64, m: f64, p: f64) -> PertTriple {
    PertTriple::new(o, m, p).unwrap()
}

fn calibration_for(perts: &[(&str, PertTriple)]) -> Calibration {
    let mut calibration = Calibration::default();
    for (bucket, triple) in perts {
        calibration
            .pert_by_bucket
            .insert((*bucket).to_string(), *triple);
    }
    calibration
}

/// S1: linear chain with PERT (1,2,3), (1,3,5), (2,4,6); with seed 42 and a
/// large N the median end lands at 9.0 +/- 0.2 days and the middle task is
/// always critical.
#[test]
fn linear_chain_simulation() {
    let snapshot = PlanSnapshot {
        plan: Plan::new("p", "Plan"),
        buckets: Vec::new(),
        tasks: vec![
            Task::new("t1", "Draft").bucket("draft"),
            Task::new("t2", "Review").bucket("review"),
            Task::new("t3", "Publish").bucket("publish"),
        ],
        dependencies: vec![Dependency::new("t1", "t2"), Dependency::new("t2", "t3")],
    };
    let calibration = calibration_for(&[
        ("draft", pert(1.0, 2.0, 3.0)),
        ("review", pert(1.0, 3.0, 5.0)),
        ("publish", pert(2.0, 4.0, 6.0)),
    ]);
    let graph = TaskGraph::build(&snapshot).unwrap();
    let params = SimulationParams::new(origin()).iterations(10_000).seed(42);
    let outcome = montecarlo::simulate(
        &snapshot,
        &graph,
        &calibration,
        &params,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(
        (outcome.end.p50 - 9.0).abs() < 0.2,
        "p50 = {}",
        outcome.end.p50
    );
    assert_eq!(outcome.per_task["t2"].cp_frequency, 1.0);
    assert_eq!(outcome.per_task["t1"].cp_frequency, 1.0);
}

/// S2 (stochastic half): symmetric diamond branches win the simulated
/// critical path about half the time each.
#[test]
fn diamond_branch_probabilities() {
    let snapshot = PlanSnapshot {
        plan: Plan::new("p", "Plan"),
        buckets: Vec::new(),
        tasks: vec![
            Task::new("t1", "Kickoff").bucket("b"),
            Task::new("t2", "Branch A").bucket("b"),
            Task::new("t3", "Branch B").bucket("b"),
            Task::new("t4", "Join").bucket("b"),
        ],
        dependencies: vec![
            Dependency::new("t1", "t2"),
            Dependency::new("t1", "t3"),
            Dependency::new("t2", "t4"),
            Dependency::new("t3", "t4"),
        ],
    };
    let calibration = calibration_for(&[("b", pert(1.0, 2.0, 3.0))]);
    let graph = TaskGraph::build(&snapshot).unwrap();
    let params = SimulationParams::new(origin()).iterations(10_000).seed(42);
    let outcome = montecarlo::simulate(
        &snapshot,
        &graph,
        &calibration,
        &params,
        &CancelToken::new(),
    )
    .unwrap();

    let p2 = outcome.per_task["t2"].cp_frequency;
    let p3 = outcome.per_task["t3"].cp_frequency;
    assert!((p2 - 0.5).abs() < 0.03, "t2 cp frequency = {p2}");
    assert!((p3 - 0.5).abs() < 0.03, "t3 cp frequency = {p3}");
    // Source and sink are always critical.
    assert_eq!(outcome.per_task["t1"].cp_frequency, 1.0);
    assert_eq!(outcome.per_task["t4"].cp_frequency, 1.0);
}

/// Sampling every duration above its most-likely can only push the plan end
/// beyond the deterministic CPM end.
#[test]
fn pessimistic_samples_dominate_deterministic_end() {
    let snapshot = PlanSnapshot {
        plan: Plan::new("p", "Plan"),
        buckets: Vec::new(),
        tasks: vec![
            Task::new("a", "A").bucket("late"),
            Task::new("b", "B").bucket("late"),
        ],
        dependencies: vec![Dependency::new("a", "b")],
    };
    // Skewed triples: O == M, so every non-degenerate sample exceeds M.
    let calibration = calibration_for(&[("late", pert(2.0, 2.0, 6.0))]);
    let graph = TaskGraph::build(&snapshot).unwrap();

    let deterministic = montecarlo::deterministic_end(&snapshot, &graph, &calibration);

    let params = SimulationParams::new(origin()).iterations(2_000).seed(7);
    let outcome = montecarlo::simulate(
        &snapshot,
        &graph,
        &calibration,
        &params,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(outcome.end.p10 >= deterministic);
}

/// Invariant 6: bit-identical outcomes for a fixed seed.
#[test]
fn seeded_runs_are_bit_identical() {
    let snapshot = PlanSnapshot {
        plan: Plan::new("p", "Plan"),
        buckets: Vec::new(),
        tasks: vec![
            Task::new("a", "A").bucket("b").assign("alice"),
            Task::new("b", "B").bucket("b").assign("alice"),
            Task::new("c", "C").bucket("b").assign("bob"),
        ],
        dependencies: vec![Dependency::new("a", "c")],
    };
    let calibration = calibration_for(&[("b", pert(1.0, 3.0, 8.0))]);
    let graph = TaskGraph::build(&snapshot).unwrap();
    let params = SimulationParams::new(origin()).iterations(1_024).seed(99);

    let first = montecarlo::simulate(
        &snapshot,
        &graph,
        &calibration,
        &params,
        &CancelToken::new(),
    )
    .unwrap();
    let second = montecarlo::simulate(
        &snapshot,
        &graph,
        &calibration,
        &params,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(first.end, second.end);
    assert_eq!(first.per_task, second.per_task);
    assert_eq!(first.bucket_variance, second.bucket_variance);
    assert_eq!(first.bottlenecks, second.bottlenecks);
}
