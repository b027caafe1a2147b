//! Critical Path Method over the task DAG.
//!
//! Textbook CPM: forward pass for early dates, backward pass for late dates,
//! slack = LS - ES, critical iff slack within epsilon of zero.
//!
//! References:
//!   - Kelley & Walker (1959) "Critical-Path Planning and Scheduling"
//!   - PMI PMBOK Guide, Chapter 6
//!
//! All arithmetic is in fractional days from the plan origin. The engine is
//! a pure function of the graph and the duration model; it performs no I/O
//! and holds no state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use confplan_core::{BucketId, DependencyType, PertTriple, PlanSnapshot, TaskId};

use crate::graph::{Edge, TaskGraph};

/// Tasks with slack at or below this are on the critical path.
pub const SLACK_EPSILON: f64 = 1e-6;

/// Fallback point estimate when neither calibration nor dates yield one.
pub const DEFAULT_DURATION_DAYS: f64 = 1.0;

// ============================================================================
// Duration model
// ============================================================================

/// Resolves a point-estimate duration per task.
///
/// Priority: calibrated `most_likely` for the task's bucket, then
/// `max(1, due - start)` when both dates are present, then one working day.
#[derive(Clone, Debug, Default)]
pub struct DurationModel {
    /// PERT triples per bucket, usually from the historical analyzer.
    pub pert_by_bucket: BTreeMap<BucketId, PertTriple>,
    /// Overrides applied on top, keyed by task id (used by impact previews).
    pub overrides: BTreeMap<TaskId, f64>,
}

impl DurationModel {
    pub fn new(pert_by_bucket: BTreeMap<BucketId, PertTriple>) -> Self {
        Self {
            pert_by_bucket,
            overrides: BTreeMap::new(),
        }
    }

    /// Point estimate for one task, in days.
    pub fn estimate(&self, task: &confplan_core::Task) -> f64 {
        if let Some(&days) = self.overrides.get(&task.id) {
            return days.max(0.0);
        }
        self.pert_by_bucket
            .get(&task.bucket_id)
            .map(|pert| pert.most_likely)
            .or_else(|| task.planned_duration_days().map(|d| d.max(1.0)))
            .unwrap_or(DEFAULT_DURATION_DAYS)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-task CPM result, all values in days from the plan origin.
#[derive(Clone, Debug, PartialEq)]
pub struct CpmResult {
    pub task_id: TaskId,
    pub early_start: f64,
    pub early_finish: f64,
    pub late_start: f64,
    pub late_finish: f64,
    pub slack: f64,
    pub is_critical: bool,
    pub duration: f64,
}

/// A complete CPM schedule for one plan.
#[derive(Clone, Debug)]
pub struct CpmSchedule {
    pub results: HashMap<TaskId, CpmResult>,
    /// One canonical maximum-weight path, ordered; ties resolved by
    /// lexicographically smallest id at every step.
    pub canonical_path: Vec<TaskId>,
    /// Every task participating in any maximum-weight path.
    pub on_critical_path: BTreeSet<TaskId>,
    /// Plan end: the maximum early finish, in days from origin.
    pub plan_end_days: f64,
}

impl CpmSchedule {
    /// The empty plan schedules trivially: no path, end at the origin.
    pub fn empty() -> Self {
        Self {
            results: HashMap::new(),
            canonical_path: Vec::new(),
            on_critical_path: BTreeSet::new(),
            plan_end_days: 0.0,
        }
    }

    pub fn slack_of(&self, task_id: &str) -> Option<f64> {
        self.results.get(task_id).map(|r| r.slack)
    }

    pub fn is_on_critical_path(&self, task_id: &str) -> bool {
        self.on_critical_path.contains(task_id)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Compute the CPM schedule for a plan.
pub fn compute(snapshot: &PlanSnapshot, graph: &TaskGraph, model: &DurationModel) -> CpmSchedule {
    if graph.topo_order.is_empty() {
        return CpmSchedule::empty();
    }

    let duration: HashMap<&TaskId, f64> = snapshot
        .tasks
        .iter()
        .map(|t| (&t.id, model.estimate(t)))
        .collect();

    let mut early_start: HashMap<&TaskId, f64> = HashMap::new();
    let mut early_finish: HashMap<&TaskId, f64> = HashMap::new();

    // Forward pass: ES = max over predecessor constraints, clamped to the
    // plan origin; EF = ES + duration.
    for task_id in &graph.topo_order {
        let dur = duration[task_id];
        let es = graph
            .predecessor_edges(task_id)
            .iter()
            .map(|edge| successor_es_bound(edge, early_finish[&edge.from], early_start[&edge.from], dur))
            .fold(0.0_f64, f64::max);
        early_start.insert(task_id, es);
        early_finish.insert(task_id, es + dur);
    }

    let plan_end_days = early_finish.values().fold(0.0_f64, |a, &b| a.max(b));

    let mut late_start: HashMap<&TaskId, f64> = HashMap::new();
    let mut late_finish: HashMap<&TaskId, f64> = HashMap::new();

    // Backward pass: LF = min over successor constraints, LS = LF - duration.
    for task_id in graph.topo_order.iter().rev() {
        let dur = duration[task_id];
        let lf = graph
            .successor_edges(task_id)
            .iter()
            .map(|edge| predecessor_lf_bound(edge, late_start[&edge.to], late_finish[&edge.to], dur))
            .fold(plan_end_days, f64::min);
        late_finish.insert(task_id, lf);
        late_start.insert(task_id, lf - dur);
    }

    let mut results: HashMap<TaskId, CpmResult> = HashMap::new();
    let mut on_critical_path: BTreeSet<TaskId> = BTreeSet::new();
    for task_id in &graph.topo_order {
        let slack = late_start[task_id] - early_start[task_id];
        let is_critical = slack <= SLACK_EPSILON;
        if is_critical {
            on_critical_path.insert(task_id.clone());
        }
        results.insert(
            task_id.clone(),
            CpmResult {
                task_id: task_id.clone(),
                early_start: early_start[task_id],
                early_finish: early_finish[task_id],
                late_start: late_start[task_id],
                late_finish: late_finish[task_id],
                slack,
                is_critical,
                duration: duration[task_id],
            },
        );
    }

    let canonical_path = canonical_path(graph, &results, &on_critical_path);

    CpmSchedule {
        results,
        canonical_path,
        on_critical_path,
        plan_end_days,
    }
}

/// ES lower bound a predecessor edge imposes on its successor.
///
/// FS and SS constrain the successor's start directly; FF and SF constrain
/// its finish, converted to a start bound by subtracting the duration.
fn successor_es_bound(edge: &Edge, pred_ef: f64, pred_es: f64, succ_duration: f64) -> f64 {
    match edge.dep_type {
        // ES(succ) >= EF(pred)
        DependencyType::FinishToStart => pred_ef,
        // ES(succ) >= ES(pred)
        DependencyType::StartToStart => pred_es,
        // EF(succ) >= EF(pred)  =>  ES(succ) >= EF(pred) - duration(succ)
        DependencyType::FinishToFinish => pred_ef - succ_duration,
        // EF(succ) >= ES(pred)  =>  ES(succ) >= ES(pred) - duration(succ)
        DependencyType::StartToFinish => pred_es - succ_duration,
    }
}

/// LF upper bound a successor edge imposes on its predecessor.
fn predecessor_lf_bound(edge: &Edge, succ_ls: f64, succ_lf: f64, pred_duration: f64) -> f64 {
    match edge.dep_type {
        // LF(pred) <= LS(succ)
        DependencyType::FinishToStart => succ_ls,
        // LS(pred) <= LS(succ)  =>  LF(pred) <= LS(succ) + duration(pred)
        DependencyType::StartToStart => succ_ls + pred_duration,
        // LF(pred) <= LF(succ)
        DependencyType::FinishToFinish => succ_lf,
        // LS(pred) <= LF(succ)  =>  LF(pred) <= LF(succ) + duration(pred)
        DependencyType::StartToFinish => succ_lf + pred_duration,
    }
}

/// Extract one canonical critical path for display.
///
/// Start from the lexicographically smallest critical task with no tight
/// critical predecessor; at each step follow the smallest critical successor
/// whose edge constraint is binding.
fn canonical_path(
    graph: &TaskGraph,
    results: &HashMap<TaskId, CpmResult>,
    critical: &BTreeSet<TaskId>,
) -> Vec<TaskId> {
    let is_tight = |edge: &Edge| -> bool {
        let pred = &results[&edge.from];
        let succ = &results[&edge.to];
        let bound = successor_es_bound(edge, pred.early_finish, pred.early_start, succ.duration);
        (succ.early_start - bound).abs() <= SLACK_EPSILON
    };

    let mut start: Option<&TaskId> = None;
    for id in critical {
        let has_tight_critical_pred = graph
            .predecessor_edges(id)
            .iter()
            .any(|e| critical.contains(&e.from) && is_tight(e));
        if !has_tight_critical_pred {
            start = Some(id);
            break;
        }
    }

    let mut path = Vec::new();
    let mut current = match start {
        Some(id) => id.clone(),
        None => return path,
    };
    loop {
        path.push(current.clone());
        let next = graph
            .successor_edges(&current)
            .iter()
            .filter(|e| critical.contains(&e.to) && is_tight(e))
            .map(|e| &e.to)
            .min();
        match next {
            Some(id) => current = id.clone(),
            None => return path,
        }
    }
}
