//! The request-level planner API.
//!
//! [`PlannerService`] is what a transport mounts: every operation of the
//! external interface, backed by the repository, the mutation core, the
//! workflow engine and the solver crate. Analytical calls load one snapshot,
//! compute against it, and memoize by content fingerprint; mutations
//! invalidate the plan's cache rows on success.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn};
use uuid::Uuid;

use confplan_core::{
    ActionStatus, Bucket, Dependency, ExternalEvent, Plan, ProposedAction, ProposedChange,
    Repository, Result, Subtask, Task, TaskId, TaskLock, TaskPatch, TaskStatus, TransitionMatrix,
};
use confplan_solver::{
    attention, cost, cpm, graph::TaskGraph, impact, intelligence, markov, montecarlo,
    AttentionReport, CancelToken, Calibration, CalibrationConfig, CostBreakdown, CostWeights,
    CpmSchedule, DurationModel, MilestoneAnalysis, SimulationOutcome, SimulationParams,
};

use crate::cache::MemoCache;
use crate::locks::LockManager;
use crate::mutation::MutationCore;
use crate::workflow::{EventWorkflow, RuleRegistry};

// ============================================================================
// Response types
// ============================================================================

/// Upstream/downstream closure of one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependenciesResponse {
    pub upstream: Vec<TaskId>,
    pub downstream: Vec<TaskId>,
    pub impact_statement: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CriticalPathResponse {
    /// The canonical path, in order.
    pub tasks: Vec<attention::TaskRef>,
    pub task_ids: Vec<TaskId>,
    pub plan_end_days: f64,
    pub plan_end: DateTime<Utc>,
    /// Graph repairs applied during the load (dropped edges).
    pub diagnostics: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonteCarloResponse {
    pub iterations: usize,
    pub p10: DateTime<Utc>,
    pub p50: DateTime<Utc>,
    pub p90: DateTime<Utc>,
    pub p95: DateTime<Utc>,
    pub p10_days: f64,
    pub p50_days: f64,
    pub p90_days: f64,
    pub p95_days: f64,
    pub probability_on_time_pct: Option<f64>,
    pub bottlenecks: Vec<montecarlo::Bottleneck>,
    /// Per-bucket variance of total duration, in days squared.
    pub risk_heatmap: BTreeMap<String, f64>,
    /// Per-task empirical critical-path probability.
    pub cp_probability: BTreeMap<TaskId, f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkovResponse {
    pub matrices: Vec<TransitionMatrix>,
    /// Present when a task was named.
    pub task: Option<MarkovTaskResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkovTaskResponse {
    pub task_id: TaskId,
    pub current_state: TaskStatus,
    pub expected_days_to_done: Option<f64>,
    pub variance_days: Option<f64>,
    pub diagnostic: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImpactResponse {
    pub affected_task_ids: Vec<TaskId>,
    pub plan_end_delta_days: f64,
    pub message: String,
    pub p50_delta_days: Option<f64>,
    pub p95_delta_days: Option<f64>,
}

/// Aggregated plan health, the dashboard view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanStatusResponse {
    pub plan_id: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub in_progress_tasks: usize,
    pub blocked_tasks: usize,
    pub not_started_tasks: usize,
    /// Mean percent-complete across open and done tasks.
    pub overall_progress: u8,
    pub forecast_end: DateTime<Utc>,
    /// Days between forecast end and the event date (positive = late).
    pub variance_days: Option<f64>,
    pub indicator: StatusIndicator,
}

/// On Track / At Risk / Behind classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusIndicator {
    OnTrack,
    AtRisk,
    Behind,
}

impl StatusIndicator {
    /// Variance <= 0 is on track; within the grace window is at risk.
    fn classify(variance_days: Option<f64>) -> Self {
        match variance_days {
            None => StatusIndicator::OnTrack,
            Some(v) if v <= 0.0 => StatusIndicator::OnTrack,
            Some(v) if v <= 5.0 => StatusIndicator::AtRisk,
            Some(_) => StatusIndicator::Behind,
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// The planner service facade.
#[derive(Clone)]
pub struct PlannerService {
    repo: Arc<dyn Repository>,
    locks: LockManager,
    mutations: MutationCore,
    workflow: EventWorkflow,
    cpm_cache: Arc<MemoCache<Arc<CpmSchedule>>>,
    simulation_cache: Arc<MemoCache<Arc<SimulationOutcome>>>,
    calibration_config: CalibrationConfig,
}

impl PlannerService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        let locks = LockManager::new(repo.clone());
        let mutations = MutationCore::new(repo.clone(), locks.clone());
        let workflow = EventWorkflow::new(repo.clone(), locks.clone(), RuleRegistry::standard());
        Self {
            repo,
            locks,
            mutations,
            workflow,
            cpm_cache: Arc::new(MemoCache::new()),
            simulation_cache: Arc::new(MemoCache::new()),
            calibration_config: CalibrationConfig::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.workflow = EventWorkflow::new(self.repo.clone(), self.locks.clone(), rules);
        self
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self
            .repo
            .list_plans()?
            .into_iter()
            .filter(|p| !p.is_template)
            .collect())
    }

    pub fn list_templates(&self) -> Result<Vec<Plan>> {
        Ok(self
            .repo
            .list_plans()?
            .into_iter()
            .filter(|p| p.is_template)
            .collect())
    }

    pub fn get_plan(&self, plan_id: &str) -> Result<Plan> {
        Ok(self.repo.load_plan(plan_id)?.plan)
    }

    pub fn get_buckets(&self, plan_id: &str) -> Result<Vec<Bucket>> {
        Ok(self.repo.load_plan(plan_id)?.buckets)
    }

    pub fn get_tasks(&self, plan_id: &str) -> Result<Vec<Task>> {
        let mut tasks = self.repo.load_plan(plan_id)?.tasks;
        tasks.sort_by(|a, b| {
            (&a.bucket_id, &a.order_hint, &a.id).cmp(&(&b.bucket_id, &b.order_hint, &b.id))
        });
        Ok(tasks)
    }

    pub fn get_task(&self, plan_id: &str, task_id: &str) -> Result<Task> {
        self.repo
            .load_plan(plan_id)?
            .require_task(task_id)
            .cloned()
    }

    /// The full snapshot, for exports and transports that re-serialize it.
    pub fn export_plan(&self, plan_id: &str) -> Result<confplan_core::PlanSnapshot> {
        self.repo.load_plan(plan_id)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn create_plan(&self, plan: Plan) -> Result<Plan> {
        self.mutations.create_plan(plan, Utc::now())
    }

    pub fn create_bucket(&self, plan_id: &str, bucket: Bucket) -> Result<()> {
        let result = self.mutations.create_bucket(plan_id, bucket, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn create_task(&self, plan_id: &str, task: Task, actor: &str) -> Result<Task> {
        let result = self.mutations.create_task(plan_id, task, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn update_task(
        &self,
        plan_id: &str,
        task_id: &str,
        patch: &TaskPatch,
        actor: &str,
    ) -> Result<Task> {
        let result = self
            .mutations
            .update_task(plan_id, task_id, patch, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn delete_task(&self, plan_id: &str, task_id: &str, actor: &str) -> Result<()> {
        let result = self.mutations.delete_task(plan_id, task_id, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn add_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask: Subtask,
        actor: &str,
    ) -> Result<Subtask> {
        let result = self
            .mutations
            .add_subtask(plan_id, task_id, subtask, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn update_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask_id: &str,
        title: Option<String>,
        checked: Option<bool>,
        actor: &str,
    ) -> Result<Subtask> {
        let result = self.mutations.update_subtask(
            plan_id, task_id, subtask_id, title, checked, actor, Utc::now(),
        );
        self.invalidate(plan_id, &result);
        result
    }

    pub fn delete_subtask(
        &self,
        plan_id: &str,
        task_id: &str,
        subtask_id: &str,
        actor: &str,
    ) -> Result<()> {
        let result = self
            .mutations
            .delete_subtask(plan_id, task_id, subtask_id, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn add_dependency(&self, plan_id: &str, dep: Dependency, actor: &str) -> Result<()> {
        let result = self.mutations.add_dependency(plan_id, dep, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn remove_dependency(
        &self,
        plan_id: &str,
        predecessor: &str,
        successor: &str,
        actor: &str,
    ) -> Result<()> {
        let result =
            self.mutations
                .remove_dependency(plan_id, predecessor, successor, actor, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn clone_template(
        &self,
        source_id: &str,
        target_id: &str,
        event_date: DateTime<Utc>,
    ) -> Result<Plan> {
        self.mutations
            .clone_template(source_id, target_id, event_date, Utc::now())
    }

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------

    pub fn get_dependencies(&self, plan_id: &str, task_id: &str) -> Result<DependenciesResponse> {
        let snapshot = self.repo.load_plan(plan_id)?;
        snapshot.require_task(task_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let upstream: Vec<TaskId> = graph.upstream_closure(task_id).into_iter().collect();
        let downstream: Vec<TaskId> = graph.downstream_closure(task_id).into_iter().collect();
        let impact_statement = format!(
            "'{task_id}' depends on {} task(s) and feeds {} downstream task(s)",
            upstream.len(),
            downstream.len()
        );
        Ok(DependenciesResponse {
            upstream,
            downstream,
            impact_statement,
        })
    }

    pub fn get_critical_path(&self, plan_id: &str) -> Result<CriticalPathResponse> {
        let _span = self.request_span("get_critical_path", plan_id);
        let snapshot = self.repo.load_plan(plan_id)?;
        let fingerprint = snapshot.fingerprint();
        let (graph, diagnostics) = TaskGraph::build_lenient(&snapshot);

        let schedule = match self.cpm_cache.get(plan_id, &fingerprint, "cpm") {
            Some(cached) => cached,
            None => {
                let calibration = self.calibration()?;
                let model = DurationModel::new(calibration.pert_by_bucket.clone());
                let computed = Arc::new(cpm::compute(&snapshot, &graph, &model));
                self.cpm_cache
                    .put(plan_id, &fingerprint, "cpm", computed.clone());
                computed
            }
        };

        let origin = Utc::now();
        let tasks: Vec<attention::TaskRef> = schedule
            .canonical_path
            .iter()
            .filter_map(|id| snapshot.get_task(id))
            .map(|t| attention::TaskRef {
                task_id: t.id.clone(),
                title: t.title.clone(),
                due: t.due,
            })
            .collect();
        Ok(CriticalPathResponse {
            task_ids: schedule.canonical_path.clone(),
            tasks,
            plan_end_days: schedule.plan_end_days,
            plan_end: origin + chrono::Duration::seconds((schedule.plan_end_days * 86_400.0) as i64),
            diagnostics: diagnostics.iter().map(|d| d.to_string()).collect(),
        })
    }

    pub fn get_attention(&self, plan_id: &str) -> Result<AttentionReport> {
        let snapshot = self.repo.load_plan(plan_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let calibration = self.calibration()?;
        let model = DurationModel::new(calibration.pert_by_bucket.clone());
        let schedule = cpm::compute(&snapshot, &graph, &model);
        Ok(attention::derive(&snapshot, &graph, &schedule, Utc::now(), None))
    }

    pub fn get_milestone_analysis(
        &self,
        plan_id: &str,
        event_date: DateTime<Utc>,
    ) -> Result<MilestoneAnalysis> {
        let snapshot = self.repo.load_plan(plan_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let calibration = self.calibration()?;
        let model = DurationModel::new(calibration.pert_by_bucket.clone());
        let schedule = cpm::compute(&snapshot, &graph, &model);
        let now = Utc::now();
        Ok(attention::milestone_analysis(
            &snapshot, &schedule, now, event_date, now,
        ))
    }

    /// Run (or recall) a Monte Carlo simulation.
    pub fn run_monte_carlo(
        &self,
        plan_id: &str,
        params: &SimulationParams,
        token: &CancelToken,
    ) -> Result<MonteCarloResponse> {
        let _span = self.request_span("run_monte_carlo", plan_id);
        let snapshot = self.repo.load_plan(plan_id)?;
        let fingerprint = snapshot.fingerprint();
        let cache_key = params.cache_key();

        let outcome = match self.simulation_cache.get(plan_id, &fingerprint, &cache_key) {
            Some(cached) => cached,
            None => {
                let (graph, _) = TaskGraph::build_lenient(&snapshot);
                let calibration = self.calibration()?;
                let computed = Arc::new(montecarlo::simulate(
                    &snapshot,
                    &graph,
                    &calibration,
                    params,
                    token,
                )?);
                self.simulation_cache
                    .put(plan_id, &fingerprint, &cache_key, computed.clone());
                computed
            }
        };

        Ok(MonteCarloResponse {
            iterations: outcome.iterations,
            p10: montecarlo::days_after(outcome.origin, outcome.end.p10),
            p50: montecarlo::days_after(outcome.origin, outcome.end.p50),
            p90: montecarlo::days_after(outcome.origin, outcome.end.p90),
            p95: montecarlo::days_after(outcome.origin, outcome.end.p95),
            p10_days: outcome.end.p10,
            p50_days: outcome.end.p50,
            p90_days: outcome.end.p90,
            p95_days: outcome.end.p95,
            probability_on_time_pct: outcome.on_time_probability_pct,
            bottlenecks: outcome.bottlenecks.clone(),
            risk_heatmap: outcome.bucket_variance.clone(),
            cp_probability: outcome
                .per_task
                .iter()
                .map(|(id, t)| (id.clone(), t.cp_frequency))
                .collect(),
        })
    }

    /// Markov matrices for the plan's buckets; with a task, also its state
    /// and expected days to completion.
    pub fn get_markov(&self, plan_id: &str, task_id: Option<&str>) -> Result<MarkovResponse> {
        let snapshot = self.repo.load_plan(plan_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);

        let mut contexts: Vec<String> = snapshot
            .tasks
            .iter()
            .map(|t| format!("bucket:{}", t.bucket_id))
            .collect();
        contexts.sort_unstable();
        contexts.dedup();

        let mut matrices = Vec::new();
        for context in &contexts {
            matrices.push(self.matrix_for(context)?);
        }

        let task = match task_id {
            Some(task_id) => {
                let task = snapshot.require_task(task_id)?;
                let context = format!("bucket:{}", task.bucket_id);
                let matrix = self.matrix_for(&context)?;
                let has_open_pred = graph
                    .predecessor_edges(task_id)
                    .iter()
                    .any(|e| {
                        snapshot
                            .get_task(&e.from)
                            .map_or(false, |t| t.status != TaskStatus::Completed)
                    });
                let state = markov::detect_state(task, has_open_pred);
                let analysis = markov::absorption_analysis(&matrix);
                let index = markov::TRANSIENT_STATES.iter().position(|&s| s == state);
                Some(MarkovTaskResponse {
                    task_id: task_id.to_string(),
                    current_state: state,
                    expected_days_to_done: analysis
                        .expected_days_from(state)
                        .filter(|d| d.is_finite()),
                    variance_days: index
                        .map(|i| analysis.variance_days[i])
                        .filter(|d| d.is_finite()),
                    diagnostic: analysis.diagnostic,
                })
            }
            None => None,
        };

        Ok(MarkovResponse { matrices, task })
    }

    pub fn compute_cost(&self, plan_id: &str, weights: &CostWeights) -> Result<CostBreakdown> {
        let snapshot = self.repo.load_plan(plan_id)?;
        let calibration = self.calibration()?;
        let model = DurationModel::new(calibration.pert_by_bucket.clone());
        Ok(cost::compute(&snapshot, &model, weights, Utc::now()))
    }

    pub fn analyze_impact(
        &self,
        plan_id: &str,
        task_id: &str,
        change: &ProposedChange,
        with_simulation: bool,
        token: &CancelToken,
    ) -> Result<ImpactResponse> {
        let _span = self.request_span("analyze_impact", plan_id);
        let snapshot = self.repo.load_plan(plan_id)?;
        let calibration = self.calibration()?;
        let params = with_simulation
            .then(|| SimulationParams::new(Utc::now()).iterations(impact::PREVIEW_ITERATIONS));
        let report = impact::analyze(
            &snapshot,
            &calibration,
            task_id,
            change,
            params.as_ref(),
            token,
        )?;
        Ok(ImpactResponse {
            affected_task_ids: report.affected.iter().cloned().collect(),
            plan_end_delta_days: report.plan_end_delta_days,
            message: report.message,
            p50_delta_days: report.simulated.as_ref().map(|s| s.p50_delta_days),
            p95_delta_days: report.simulated.as_ref().map(|s| s.p95_delta_days),
        })
    }

    pub fn get_task_intelligence(
        &self,
        plan_id: &str,
        task_id: &str,
        include_simulations: bool,
    ) -> Result<intelligence::IntelligenceBundle> {
        let _span = self.request_span("get_task_intelligence", plan_id);
        let snapshot = self.repo.load_plan(plan_id)?;
        snapshot.require_task(task_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let calibration = self.calibration()?;
        let model = DurationModel::new(calibration.pert_by_bucket.clone());
        let schedule = cpm::compute(&snapshot, &graph, &model);
        let now = Utc::now();

        let mut diagnostics = Vec::new();
        let simulation = if include_simulations {
            let params = SimulationParams::new(now).iterations(impact::PREVIEW_ITERATIONS);
            match montecarlo::simulate(&snapshot, &graph, &calibration, &params, &CancelToken::new())
            {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!(plan_id, task_id, %err, "intelligence simulation failed");
                    diagnostics.push(format!("monte_carlo: {err}"));
                    None
                }
            }
        } else {
            None
        };

        let markov_input = if include_simulations {
            let task = snapshot.require_task(task_id)?;
            let context = format!("bucket:{}", task.bucket_id);
            match self.matrix_for(&context) {
                Ok(matrix) => {
                    let has_open_pred = graph.predecessor_edges(task_id).iter().any(|e| {
                        snapshot
                            .get_task(&e.from)
                            .map_or(false, |t| t.status != TaskStatus::Completed)
                    });
                    let state = markov::detect_state(task, has_open_pred);
                    Some((markov::absorption_analysis(&matrix), state))
                }
                Err(err) => {
                    diagnostics.push(format!("markov: {err}"));
                    None
                }
            }
        } else {
            None
        };

        intelligence::assemble(
            &snapshot,
            &graph,
            &schedule,
            &calibration,
            task_id,
            now,
            simulation.as_ref(),
            markov_input.as_ref().map(|(a, s)| (a, *s)),
            diagnostics,
        )
    }

    /// Aggregated plan health.
    pub fn get_plan_status(&self, plan_id: &str) -> Result<PlanStatusResponse> {
        let snapshot = self.repo.load_plan(plan_id)?;
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let calibration = self.calibration()?;
        let model = DurationModel::new(calibration.pert_by_bucket.clone());
        let schedule = cpm::compute(&snapshot, &graph, &model);

        let count_status = |status: TaskStatus| {
            snapshot.tasks.iter().filter(|t| t.status == status).count()
        };
        let total = snapshot.tasks.len();
        let overall_progress = if total == 0 {
            0
        } else {
            (snapshot
                .tasks
                .iter()
                .map(|t| u32::from(t.percent_complete))
                .sum::<u32>()
                / total as u32) as u8
        };

        let now = Utc::now();
        let forecast_end =
            now + chrono::Duration::seconds((schedule.plan_end_days * 86_400.0) as i64);
        let variance_days = snapshot
            .plan
            .event_date
            .map(|event| (forecast_end - event).num_seconds() as f64 / 86_400.0);

        Ok(PlanStatusResponse {
            plan_id: plan_id.to_string(),
            total_tasks: total,
            completed_tasks: count_status(TaskStatus::Completed),
            in_progress_tasks: count_status(TaskStatus::InProgress),
            blocked_tasks: count_status(TaskStatus::Blocked),
            not_started_tasks: count_status(TaskStatus::NotStarted),
            overall_progress,
            forecast_end,
            variance_days,
            indicator: StatusIndicator::classify(variance_days),
        })
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    pub fn acquire_lock(
        &self,
        plan_id: &str,
        task_id: &str,
        user: &str,
        ttl_secs: Option<i64>,
    ) -> Result<TaskLock> {
        self.locks
            .acquire(plan_id, task_id, user, ttl_secs, Utc::now())
    }

    pub fn release_lock(&self, plan_id: &str, task_id: &str, user: &str) -> Result<()> {
        self.locks.release(plan_id, task_id, user, Utc::now())
    }

    pub fn get_lock(&self, plan_id: &str, task_id: &str) -> Result<Option<TaskLock>> {
        self.locks.get(plan_id, task_id, Utc::now())
    }

    /// Clock-controlled variants used by tests and batch tooling.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    // ------------------------------------------------------------------
    // Events & actions
    // ------------------------------------------------------------------

    pub fn ingest_event(
        &self,
        plan_id: &str,
        event: ExternalEvent,
    ) -> Result<(ExternalEvent, Vec<ProposedAction>)> {
        self.workflow.ingest(plan_id, event, Utc::now())
    }

    pub fn list_events(&self, plan_id: &str) -> Result<Vec<ExternalEvent>> {
        self.repo.list_events(plan_id)
    }

    pub fn delete_event(&self, plan_id: &str, event_id: i64) -> Result<()> {
        self.workflow.delete_event(plan_id, event_id)
    }

    pub fn list_proposed_actions(
        &self,
        plan_id: &str,
        status: Option<ActionStatus>,
    ) -> Result<Vec<ProposedAction>> {
        self.repo.list_actions(plan_id, status)
    }

    pub fn approve_action(
        &self,
        plan_id: &str,
        action_id: i64,
        decider: &str,
    ) -> Result<ProposedAction> {
        let result = self
            .workflow
            .approve(plan_id, action_id, decider, Utc::now());
        self.invalidate(plan_id, &result);
        result
    }

    pub fn reject_action(
        &self,
        plan_id: &str,
        action_id: i64,
        decider: &str,
    ) -> Result<ProposedAction> {
        self.workflow.reject(plan_id, action_id, decider, Utc::now())
    }

    pub fn delete_action(&self, plan_id: &str, action_id: i64) -> Result<()> {
        self.workflow.delete_action(plan_id, action_id)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn calibration(&self) -> Result<Calibration> {
        let samples = self.repo.load_history(&[])?;
        Ok(confplan_solver::calibrate(&samples, &self.calibration_config))
    }

    /// Learned (or stored) transition matrix for a context.
    fn matrix_for(&self, context: &str) -> Result<TransitionMatrix> {
        if let Some(stored) = self.repo.load_transition_matrix(context)? {
            return Ok(stored);
        }
        let snapshots = self.repo.load_state_snapshots(context)?;
        Ok(markov::learn_matrix(
            context,
            &snapshots,
            markov::DEFAULT_STEP_DAYS,
        ))
    }

    fn invalidate<T>(&self, plan_id: &str, result: &Result<T>) {
        if result.is_ok() {
            self.cpm_cache.invalidate_plan(plan_id);
            self.simulation_cache.invalidate_plan(plan_id);
        }
    }

    fn request_span(&self, operation: &str, plan_id: &str) -> tracing::span::EnteredSpan {
        info_span!(
            "planner_request",
            operation,
            plan_id,
            correlation_id = %Uuid::new_v4()
        )
        .entered()
    }
}
