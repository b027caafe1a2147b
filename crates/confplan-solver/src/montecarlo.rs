//! Monte Carlo schedule simulation.
//!
//! Each iteration samples every task's duration from a Beta-PERT
//! distribution calibrated per bucket, applies the bucket bias factor, walks
//! the DAG in topological order with an M/M/1-style queuing penalty for
//! assignee contention, and backtracks the binding-constraint chain to mark
//! the simulated critical path.
//!
//! # Determinism
//!
//! Every iteration derives its own RNG stream from the master seed through
//! a SplitMix64 mix of the iteration index. Results are therefore
//! bit-identical for a fixed seed and input, independent of chunking or the
//! rayon thread pool.
//!
//! # Cancellation
//!
//! Iterations run in chunks of [`CHUNK_SIZE`]; the cancellation token is
//! checked between chunks, so a cancel lands within at most one chunk of
//! work.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use rayon::prelude::*;
use tracing::debug;

use confplan_core::{
    BucketId, PertTriple, PlanError, PlanSnapshot, Result, TaskId,
};

use crate::cancel::CancelToken;
use crate::cpm;
use crate::graph::TaskGraph;
use crate::history::{percentile, Calibration};

/// Iterations per cancellation check.
pub const CHUNK_SIZE: usize = 256;

/// Default queuing penalty per concurrent competing task, in days.
pub const DEFAULT_QUEUING_DELAY_DAYS: f64 = 0.25;

/// Default iteration count.
pub const DEFAULT_ITERATIONS: usize = 10_000;

// ============================================================================
// Parameters
// ============================================================================

/// Simulation inputs beyond the plan itself.
#[derive(Clone, Debug)]
pub struct SimulationParams {
    pub iterations: usize,
    pub seed: u64,
    /// Instant that maps day 0 of the simulation to the calendar.
    pub origin: DateTime<Utc>,
    /// Target event date for the on-time probability.
    pub event_date: Option<DateTime<Utc>>,
    /// Use the calibration's global prior for buckets without a PERT triple
    /// instead of failing with `InsufficientCalibration`.
    pub use_prior_fallback: bool,
    /// Queuing penalty per extra concurrent task sharing an assignee.
    pub queuing_delay_days: f64,
    /// Per-task duration overrides, used by impact previews.
    pub overrides: BTreeMap<TaskId, f64>,
}

impl SimulationParams {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            seed: 0,
            origin,
            event_date: None,
            use_prior_fallback: true,
            queuing_delay_days: DEFAULT_QUEUING_DELAY_DAYS,
            overrides: BTreeMap::new(),
        }
    }

    pub fn iterations(mut self, n: usize) -> Self {
        self.iterations = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn event_date(mut self, date: DateTime<Utc>) -> Self {
        self.event_date = Some(date);
        self
    }

    /// Stable cache key for memoized outcomes.
    pub fn cache_key(&self) -> String {
        format!(
            "n={};seed={};origin={};event={};prior={};k={};overrides={}",
            self.iterations,
            self.seed,
            self.origin.to_rfc3339(),
            self.event_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            self.use_prior_fallback,
            self.queuing_delay_days,
            self.overrides
                .iter()
                .map(|(id, d)| format!("{id}:{d}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Percentiles of the plan-end distribution, in days from the origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EndDistribution {
    pub p10: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Convert a day offset from the simulation origin into an instant.
pub fn days_after(origin: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    origin + Duration::seconds((days * 86_400.0) as i64)
}

/// A ranked schedule bottleneck.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bottleneck {
    pub task_id: TaskId,
    /// Fraction of iterations the task sat on the simulated critical path.
    pub cp_frequency: f64,
    pub mean_duration_days: f64,
}

/// Per-task simulation aggregate.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskOutcome {
    pub cp_frequency: f64,
    pub finish_p50_days: f64,
    pub finish_p95_days: f64,
    pub mean_duration_days: f64,
}

/// Everything one simulation run produces.
#[derive(Clone, Debug)]
pub struct SimulationOutcome {
    pub iterations: usize,
    pub end: EndDistribution,
    pub origin: DateTime<Utc>,
    pub per_task: BTreeMap<TaskId, TaskOutcome>,
    /// Sample variance of the per-bucket duration sums, in days squared.
    pub bucket_variance: BTreeMap<BucketId, f64>,
    pub bottlenecks: Vec<Bottleneck>,
    /// Percentage of iterations finishing by the event date, when given.
    pub on_time_probability_pct: Option<f64>,
}

// ============================================================================
// Engine
// ============================================================================

struct TaskSetup {
    id: TaskId,
    bucket: BucketId,
    pert: PertTriple,
    bias: f64,
    /// Fixed duration override, bypassing sampling.
    fixed: Option<f64>,
    assignees: Vec<usize>,
    /// Predecessor edges as (setup index, dep type).
    preds: Vec<(usize, confplan_core::DependencyType)>,
}

/// Run the simulation.
///
/// Fails with `InsufficientCalibration` when a bucket lacks a PERT triple
/// and the prior fallback is disabled, and with `Cancelled` when the token
/// fires between chunks.
pub fn simulate(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    calibration: &Calibration,
    params: &SimulationParams,
    token: &CancelToken,
) -> Result<SimulationOutcome> {
    let setups = build_setups(snapshot, graph, calibration, params)?;
    let n = params.iterations.max(1);
    debug!(tasks = setups.len(), iterations = n, "starting simulation");

    let task_count = setups.len();
    let mut ends: Vec<f64> = Vec::with_capacity(n);
    let mut finishes: Vec<Vec<f64>> = vec![Vec::with_capacity(n); task_count];
    let mut cp_hits: Vec<usize> = vec![0; task_count];
    let mut duration_sums: Vec<f64> = vec![0.0; task_count];
    let mut bucket_sums: BTreeMap<&BucketId, Vec<f64>> = BTreeMap::new();
    for setup in &setups {
        bucket_sums.entry(&setup.bucket).or_default();
    }

    let mut done = 0usize;
    while done < n {
        if token.is_cancelled() {
            return Err(PlanError::Cancelled);
        }
        let chunk = CHUNK_SIZE.min(n - done);
        let results: Vec<IterationResult> = (done..done + chunk)
            .into_par_iter()
            .map(|i| run_iteration(&setups, params, i as u64))
            .collect();

        // Sequential fold in iteration order keeps aggregation exact and
        // deterministic.
        for result in results {
            ends.push(result.end);
            for (task_index, &finish) in result.finishes.iter().enumerate() {
                finishes[task_index].push(finish);
                duration_sums[task_index] += result.durations[task_index];
            }
            for (task_index, on_cp) in result.on_cp.iter().enumerate() {
                if *on_cp {
                    cp_hits[task_index] += 1;
                }
            }
            let mut per_bucket: BTreeMap<&BucketId, f64> = BTreeMap::new();
            for (task_index, setup) in setups.iter().enumerate() {
                *per_bucket.entry(&setup.bucket).or_insert(0.0) +=
                    result.durations[task_index];
            }
            for (bucket, sum) in per_bucket {
                bucket_sums.get_mut(bucket).expect("bucket registered").push(sum);
            }
        }
        done += chunk;
    }

    ends.sort_by(|a, b| a.partial_cmp(b).expect("finite end times"));
    let end = EndDistribution {
        p10: percentile(&ends, 10.0),
        p50: percentile(&ends, 50.0),
        p75: percentile(&ends, 75.0),
        p90: percentile(&ends, 90.0),
        p95: percentile(&ends, 95.0),
    };

    let on_time_probability_pct = params.event_date.map(|event| {
        let budget_days = (event - params.origin).num_seconds() as f64 / 86_400.0;
        let on_time = ends.iter().filter(|&&e| e <= budget_days).count();
        100.0 * on_time as f64 / ends.len() as f64
    });

    let mut per_task: BTreeMap<TaskId, TaskOutcome> = BTreeMap::new();
    for (task_index, setup) in setups.iter().enumerate() {
        let series = &mut finishes[task_index];
        series.sort_by(|a, b| a.partial_cmp(b).expect("finite finish times"));
        per_task.insert(
            setup.id.clone(),
            TaskOutcome {
                cp_frequency: cp_hits[task_index] as f64 / n as f64,
                finish_p50_days: percentile(series, 50.0),
                finish_p95_days: percentile(series, 95.0),
                mean_duration_days: duration_sums[task_index] / n as f64,
            },
        );
    }

    let bucket_variance = bucket_sums
        .into_iter()
        .map(|(bucket, sums)| (bucket.clone(), sample_variance(&sums)))
        .collect();

    let mut bottlenecks: Vec<Bottleneck> = per_task
        .iter()
        .filter(|(_, outcome)| outcome.cp_frequency > 0.0)
        .map(|(id, outcome)| Bottleneck {
            task_id: id.clone(),
            cp_frequency: outcome.cp_frequency,
            mean_duration_days: outcome.mean_duration_days,
        })
        .collect();
    bottlenecks.sort_by(|a, b| {
        b.cp_frequency
            .partial_cmp(&a.cp_frequency)
            .expect("finite frequency")
            .then_with(|| {
                b.mean_duration_days
                    .partial_cmp(&a.mean_duration_days)
                    .expect("finite duration")
            })
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    bottlenecks.truncate(10);

    Ok(SimulationOutcome {
        iterations: n,
        end,
        origin: params.origin,
        per_task,
        bucket_variance,
        bottlenecks,
        on_time_probability_pct,
    })
}

fn build_setups(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    calibration: &Calibration,
    params: &SimulationParams,
) -> Result<Vec<TaskSetup>> {
    // Index tasks in topological order so the walk is a plain scan.
    let index_of: HashMap<&TaskId, usize> = graph
        .topo_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();

    let mut assignee_ids: HashMap<&str, usize> = HashMap::new();
    let mut setups = Vec::with_capacity(graph.topo_order.len());
    for task_id in &graph.topo_order {
        let task = snapshot.require_task(task_id)?;
        // Calibrated bucket first; a task with planned dates supplies its
        // own default triple; then the global prior, when allowed.
        let pert = match calibration.pert_by_bucket.get(&task.bucket_id) {
            Some(&triple) => triple,
            None => match task.planned_duration_days() {
                Some(days) if days > 0.0 => PertTriple {
                    optimistic: 0.75 * days,
                    most_likely: days,
                    pessimistic: 1.5 * days,
                },
                _ if params.use_prior_fallback => calibration.global_prior,
                _ => {
                    return Err(PlanError::InsufficientCalibration(task.bucket_id.clone()));
                }
            },
        };
        let assignees = task
            .assignees
            .iter()
            .map(|user| {
                let next = assignee_ids.len();
                *assignee_ids.entry(user.as_str()).or_insert(next)
            })
            .collect();
        let preds = graph
            .predecessor_edges(task_id)
            .iter()
            .map(|edge| (index_of[&edge.from], edge.dep_type))
            .collect();
        setups.push(TaskSetup {
            id: task_id.clone(),
            bucket: task.bucket_id.clone(),
            pert,
            bias: calibration.bias(&task.bucket_id),
            fixed: params.overrides.get(task_id).copied(),
            assignees,
            preds,
        });
    }
    Ok(setups)
}

struct IterationResult {
    end: f64,
    finishes: Vec<f64>,
    durations: Vec<f64>,
    on_cp: Vec<bool>,
}

fn run_iteration(setups: &[TaskSetup], params: &SimulationParams, index: u64) -> IterationResult {
    let mut rng = StdRng::seed_from_u64(splitmix64(params.seed ^ index.wrapping_mul(0x9E37_79B9)));

    let count = setups.len();
    let mut durations = vec![0.0_f64; count];
    let mut starts = vec![0.0_f64; count];
    let mut finishes = vec![0.0_f64; count];
    // Busy intervals per assignee, for the queuing penalty.
    let mut busy: HashMap<usize, Vec<(f64, f64)>> = HashMap::new();

    for (i, setup) in setups.iter().enumerate() {
        durations[i] = match setup.fixed {
            Some(days) => days,
            None => sample_beta_pert(&setup.pert, &mut rng) * setup.bias,
        };
    }

    for (i, setup) in setups.iter().enumerate() {
        let start = setup
            .preds
            .iter()
            .map(|&(pred, dep_type)| {
                constraint_bound(dep_type, starts[pred], finishes[pred], durations[i])
            })
            .fold(0.0_f64, f64::max);

        // Queuing: each extra task occupying a shared assignee at `start`
        // costs a fixed penalty.
        let mut concurrent = 0usize;
        for &assignee in &setup.assignees {
            if let Some(intervals) = busy.get(&assignee) {
                concurrent += intervals
                    .iter()
                    .filter(|&&(s, f)| s <= start && start < f)
                    .count();
            }
        }
        let delay = params.queuing_delay_days * concurrent as f64;

        let finish = start + durations[i] + delay;
        starts[i] = start;
        finishes[i] = finish;
        for &assignee in &setup.assignees {
            busy.entry(assignee).or_default().push((start, finish));
        }
    }

    // Backtrack the binding chain from the latest finisher: that path is the
    // simulated critical path of this iteration.
    let mut on_cp = vec![false; count];
    if count > 0 {
        let mut current = finishes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite finish"))
            .map(|(i, _)| i)
            .expect("non-empty plan");
        loop {
            on_cp[current] = true;
            let binding = setups[current]
                .preds
                .iter()
                .filter(|&&(pred, dep_type)| {
                    let bound =
                        constraint_bound(dep_type, starts[pred], finishes[pred], durations[current]);
                    (starts[current] - bound).abs() < 1e-9
                })
                .map(|&(pred, _)| pred)
                .min_by(|a, b| setups[*a].id.cmp(&setups[*b].id));
            match binding {
                Some(pred) => current = pred,
                None => break,
            }
        }
    }

    IterationResult {
        end: finishes.iter().fold(0.0_f64, |a, &b| a.max(b)),
        finishes,
        durations,
        on_cp,
    }
}

/// Start lower bound a predecessor imposes, mirroring the deterministic CPM
/// arithmetic so both engines agree on edge semantics.
fn constraint_bound(
    dep_type: confplan_core::DependencyType,
    pred_start: f64,
    pred_finish: f64,
    succ_duration: f64,
) -> f64 {
    use confplan_core::DependencyType as D;
    match dep_type {
        D::FinishToStart => pred_finish,
        D::StartToStart => pred_start,
        D::FinishToFinish => pred_finish - succ_duration,
        D::StartToFinish => pred_start - succ_duration,
    }
}

/// Sample a Beta-PERT duration.
///
/// alpha = 1 + 4(M-O)/(P-O), beta = 1 + 4(P-M)/(P-O); a degenerate triple
/// is a point mass at M.
fn sample_beta_pert(pert: &PertTriple, rng: &mut StdRng) -> f64 {
    let span = pert.pessimistic - pert.optimistic;
    if span < 1e-9 {
        return pert.most_likely;
    }
    let alpha = 1.0 + 4.0 * (pert.most_likely - pert.optimistic) / span;
    let beta = 1.0 + 4.0 * (pert.pessimistic - pert.most_likely) / span;
    match Beta::new(alpha, beta) {
        Ok(dist) => pert.optimistic + dist.sample(rng) * span,
        // alpha/beta >= 1 by construction; keep a sane fallback anyway.
        Err(_) => pert.optimistic + rng.gen::<f64>() * span,
    }
}

/// SplitMix64 finalizer: decorrelates consecutive iteration seeds.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Convenience: deterministic CPM end with `most_likely` durations, used by
/// callers comparing simulated against deterministic ends.
pub fn deterministic_end(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    calibration: &Calibration,
) -> f64 {
    let model = cpm::DurationModel::new(calibration.pert_by_bucket.clone());
    cpm::compute(snapshot, graph, &model).plan_end_days
}

#[cfg(test)]
mod tests {
    use super::*;
    use confplan_core::{Dependency, Plan, Task};
    use pretty_assertions::assert_eq;

    fn plan_with(
        tasks: &[(&str, &str)],
        deps: &[(&str, &str)],
        perts: &[(&str, (f64, f64, f64))],
    ) -> (PlanSnapshot, TaskGraph, Calibration) {
        let snapshot = PlanSnapshot {
            plan: Plan::new("p", "Plan"),
            buckets: Vec::new(),
            tasks: tasks
                .iter()
                .map(|(id, bucket)| Task::new(*id, *id).bucket(*bucket))
                .collect(),
            dependencies: deps
                .iter()
                .map(|(from, to)| Dependency::new(*from, *to))
                .collect(),
        };
        let graph = TaskGraph::build(&snapshot).unwrap();
        let mut calibration = Calibration::default();
        calibration.global_prior = PertTriple {
            optimistic: 1.0,
            most_likely: 3.0,
            pessimistic: 7.0,
        };
        for (bucket, (o, m, p)) in perts {
            calibration.pert_by_bucket.insert(
                (*bucket).to_string(),
                PertTriple {
                    optimistic: *o,
                    most_likely: *m,
                    pessimistic: *p,
                },
            );
        }
        (snapshot, graph, calibration)
    }

    fn origin() -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let (snapshot, graph, calibration) = plan_with(
            &[("a", "Venue"), ("b", "Venue"), ("c", "Program")],
            &[("a", "b")],
            &[("Venue", (1.0, 2.0, 4.0)), ("Program", (2.0, 3.0, 5.0))],
        );
        let params = SimulationParams::new(origin()).iterations(600).seed(42);
        let token = CancelToken::new();
        let first = simulate(&snapshot, &graph, &calibration, &params, &token).unwrap();
        let second = simulate(&snapshot, &graph, &calibration, &params, &token).unwrap();
        assert_eq!(first.end, second.end);
        assert_eq!(first.per_task, second.per_task);
        assert_eq!(first.bucket_variance, second.bucket_variance);
    }

    #[test]
    fn different_seeds_differ() {
        let (snapshot, graph, calibration) =
            plan_with(&[("a", "Venue")], &[], &[("Venue", (1.0, 2.0, 4.0))]);
        let token = CancelToken::new();
        let a = simulate(
            &snapshot,
            &graph,
            &calibration,
            &SimulationParams::new(origin()).iterations(500).seed(1),
            &token,
        )
        .unwrap();
        let b = simulate(
            &snapshot,
            &graph,
            &calibration,
            &SimulationParams::new(origin()).iterations(500).seed(2),
            &token,
        )
        .unwrap();
        assert_ne!(a.end, b.end);
    }

    #[test]
    fn single_task_cp_probability_is_one() {
        let (snapshot, graph, calibration) =
            plan_with(&[("only", "Venue")], &[], &[("Venue", (1.0, 2.0, 4.0))]);
        let params = SimulationParams::new(origin()).iterations(300).seed(7);
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        assert_eq!(outcome.per_task["only"].cp_frequency, 1.0);
    }

    #[test]
    fn degenerate_pert_is_point_mass() {
        let (snapshot, graph, calibration) =
            plan_with(&[("a", "Venue")], &[], &[("Venue", (3.0, 3.0, 3.0))]);
        let params = SimulationParams::new(origin()).iterations(200).seed(9);
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        assert_eq!(outcome.end.p10, 3.0);
        assert_eq!(outcome.end.p95, 3.0);
        assert_eq!(outcome.bucket_variance["Venue"], 0.0);
    }

    #[test]
    fn missing_calibration_without_fallback_fails() {
        let (snapshot, graph, calibration) = plan_with(&[("a", "Mystery")], &[], &[]);
        let mut params = SimulationParams::new(origin()).iterations(10);
        params.use_prior_fallback = false;
        let err = simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, PlanError::InsufficientCalibration(b) if b == "Mystery"));
    }

    #[test]
    fn missing_calibration_with_fallback_uses_prior() {
        let (snapshot, graph, calibration) = plan_with(&[("a", "Mystery")], &[], &[]);
        let params = SimulationParams::new(origin()).iterations(50).seed(3);
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        // Prior is (1, 3, 7): ends stay inside its support.
        assert!(outcome.end.p10 >= 1.0 && outcome.end.p95 <= 7.0);
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        let (snapshot, graph, calibration) =
            plan_with(&[("a", "Venue")], &[], &[("Venue", (1.0, 2.0, 4.0))]);
        let token = CancelToken::new();
        token.cancel();
        let params = SimulationParams::new(origin()).iterations(5_000);
        let err =
            simulate(&snapshot, &graph, &calibration, &params, &token).unwrap_err();
        assert!(matches!(err, PlanError::Cancelled));
    }

    #[test]
    fn on_time_probability_brackets() {
        let (snapshot, graph, calibration) =
            plan_with(&[("a", "Venue")], &[], &[("Venue", (1.0, 2.0, 4.0))]);
        // Event 10 days out: always on time for a task capped at 4 days.
        let params = SimulationParams::new(origin())
            .iterations(200)
            .seed(5)
            .event_date(origin() + Duration::days(10));
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        assert_eq!(outcome.on_time_probability_pct, Some(100.0));

        // Event in the past: never on time.
        let params = SimulationParams::new(origin())
            .iterations(200)
            .seed(5)
            .event_date(origin() - Duration::days(1));
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        assert_eq!(outcome.on_time_probability_pct, Some(0.0));
    }

    #[test]
    fn queuing_delay_penalizes_shared_assignee() {
        // Two independent tasks, same assignee: the later-scheduled one
        // pays the penalty whenever intervals overlap at its start (always,
        // since both start at 0).
        let mut snapshot = PlanSnapshot {
            plan: Plan::new("p", "Plan"),
            buckets: Vec::new(),
            tasks: vec![
                Task::new("a", "a").bucket("Venue").assign("alice"),
                Task::new("b", "b").bucket("Venue").assign("alice"),
            ],
            dependencies: Vec::new(),
        };
        snapshot.tasks[0].priority = 5;
        let graph = TaskGraph::build(&snapshot).unwrap();
        let mut calibration = Calibration::default();
        calibration.pert_by_bucket.insert(
            "Venue".into(),
            PertTriple {
                optimistic: 2.0,
                most_likely: 2.0,
                pessimistic: 2.0,
            },
        );
        let params = SimulationParams::new(origin()).iterations(10).seed(1);
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        // a runs first (topo id order) with no penalty; b pays 0.25.
        assert_eq!(outcome.per_task["a"].finish_p50_days, 2.0);
        assert_eq!(outcome.per_task["b"].finish_p50_days, 2.25);
    }

    #[test]
    fn sampled_durations_within_support() {
        let (snapshot, graph, calibration) =
            plan_with(&[("a", "Venue")], &[], &[("Venue", (2.0, 3.0, 6.0))]);
        let params = SimulationParams::new(origin()).iterations(500).seed(13);
        let outcome =
            simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new()).unwrap();
        assert!(outcome.end.p10 >= 2.0);
        assert!(outcome.end.p95 <= 6.0);
    }
}
