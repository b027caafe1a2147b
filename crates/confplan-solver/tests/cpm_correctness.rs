//! End-to-end CPM correctness over the public API.
//!
//! Mirrors the classic textbook cases: chains, diamonds, slack, and the
//! non-FS dependency types.

use confplan_core::{Dependency, DependencyType, PertTriple, Plan, PlanSnapshot, Task};
use confplan_solver::graph::TaskGraph;
use confplan_solver::{cpm, DurationModel};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn snapshot(tasks: Vec<Task>, dependencies: Vec<Dependency>) -> PlanSnapshot {
    PlanSnapshot {
        plan: Plan::new("p", "Plan"),
        buckets: Vec::new(),
        tasks,
        dependencies,
    }
}

fn pert(o: f64, m: f64, p: f64) -> PertTriple {
    PertTriple::new(o, m, p).unwrap()
}

/// S1: a linear chain with PERT buckets (1,2,3), (1,3,5), (2,4,6).
#[test]
fn linear_chain_uses_most_likely_durations() {
    let snap = snapshot(
        vec![
            Task::new("t1", "Draft program").bucket("draft"),
            Task::new("t2", "Review program").bucket("review"),
            Task::new("t3", "Publish program").bucket("publish"),
        ],
        vec![Dependency::new("t1", "t2"), Dependency::new("t2", "t3")],
    );
    let mut perts = BTreeMap::new();
    perts.insert("draft".to_string(), pert(1.0, 2.0, 3.0));
    perts.insert("review".to_string(), pert(1.0, 3.0, 5.0));
    perts.insert("publish".to_string(), pert(2.0, 4.0, 6.0));

    let graph = TaskGraph::build(&snap).unwrap();
    let schedule = cpm::compute(&snap, &graph, &DurationModel::new(perts));

    assert_eq!(schedule.canonical_path, vec!["t1", "t2", "t3"]);
    assert_eq!(schedule.plan_end_days, 9.0);
    assert!(schedule.is_on_critical_path("t2"));
}

/// S2 (deterministic half): a diamond with equal durations is entirely
/// critical and the canonical path takes the lexicographically smaller
/// branch.
#[test]
fn diamond_with_tie() {
    let snap = snapshot(
        vec![
            Task::new("t1", "Kickoff").bucket("b"),
            Task::new("t2", "Branch A").bucket("b"),
            Task::new("t3", "Branch B").bucket("b"),
            Task::new("t4", "Join").bucket("b"),
        ],
        vec![
            Dependency::new("t1", "t2"),
            Dependency::new("t1", "t3"),
            Dependency::new("t2", "t4"),
            Dependency::new("t3", "t4"),
        ],
    );
    let mut perts = BTreeMap::new();
    perts.insert("b".to_string(), pert(2.0, 2.0, 2.0));

    let graph = TaskGraph::build(&snap).unwrap();
    let schedule = cpm::compute(&snap, &graph, &DurationModel::new(perts));

    assert_eq!(schedule.canonical_path, vec!["t1", "t2", "t4"]);
    let on_cp: Vec<_> = schedule.on_critical_path.iter().cloned().collect();
    assert_eq!(on_cp, vec!["t1", "t2", "t3", "t4"]);
    assert_eq!(schedule.plan_end_days, 6.0);
}

#[test]
fn mixed_dependency_types_schedule_consistently() {
    // a(4) -SS-> b(2): b can run inside a.
    // a(4) -FF-> c(3): c must finish with a.
    let snap = snapshot(
        vec![
            Task::new("a", "Setup").bucket("four"),
            Task::new("b", "Parallel start").bucket("two"),
            Task::new("c", "Finish together").bucket("three"),
        ],
        vec![
            Dependency::new("a", "b").typed(DependencyType::StartToStart),
            Dependency::new("a", "c").typed(DependencyType::FinishToFinish),
        ],
    );
    let mut perts = BTreeMap::new();
    perts.insert("four".to_string(), pert(4.0, 4.0, 4.0));
    perts.insert("two".to_string(), pert(2.0, 2.0, 2.0));
    perts.insert("three".to_string(), pert(3.0, 3.0, 3.0));

    let graph = TaskGraph::build(&snap).unwrap();
    let schedule = cpm::compute(&snap, &graph, &DurationModel::new(perts));

    assert_eq!(schedule.results["b"].early_start, 0.0);
    assert_eq!(schedule.results["b"].early_finish, 2.0);
    assert_eq!(schedule.results["c"].early_finish, 4.0);
    assert_eq!(schedule.results["c"].early_start, 1.0);
    assert_eq!(schedule.plan_end_days, 4.0);
}

#[test]
fn cycle_detection_reports_members() {
    let snap = snapshot(
        vec![
            Task::new("a", "a"),
            Task::new("b", "b"),
            Task::new("c", "c"),
            Task::new("free", "free"),
        ],
        vec![
            Dependency::new("a", "b"),
            Dependency::new("b", "c"),
            Dependency::new("c", "a"),
        ],
    );
    match TaskGraph::build(&snap) {
        Err(confplan_core::PlanError::CycleDetected(nodes)) => {
            assert_eq!(nodes, vec!["a", "b", "c"]);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn empty_plan_has_empty_critical_path() {
    let snap = snapshot(vec![], vec![]);
    let graph = TaskGraph::build(&snap).unwrap();
    let schedule = cpm::compute(&snap, &graph, &DurationModel::default());
    assert!(schedule.canonical_path.is_empty());
    assert!(schedule.on_critical_path.is_empty());
    assert_eq!(schedule.plan_end_days, 0.0);
}
