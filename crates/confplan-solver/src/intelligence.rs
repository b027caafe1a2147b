//! Task intelligence: fused risk assessment for one task.
//!
//! Combines the critical-path schedule, upstream dependency health,
//! historical assignee throughput, and (optionally) Monte Carlo and Markov
//! results into a single bundle: a 0-100 risk score, graded dependency
//! risks, timeline and resource suggestions, and ranked assignee
//! recommendations.
//!
//! Partial results are the contract: a failed sub-computation lands in
//! `diagnostics` instead of failing the call. Only an unknown task fails.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confplan_core::{PlanSnapshot, Result, Task, TaskId, TaskStatus, UserId};

use crate::cpm::CpmSchedule;
use crate::graph::TaskGraph;
use crate::history::Calibration;
use crate::markov::AbsorptionAnalysis;
use crate::montecarlo;
use crate::montecarlo::SimulationOutcome;

/// Individual caps applied to the risk-factor counts before weighting.
const FACTOR_CAP: u32 = 3;

/// Slack below this many days makes a critical task "tight".
const TIGHT_SLACK_DAYS: f64 = 2.0;

/// Due within this many days plus low progress means "at risk".
const AT_RISK_HORIZON_DAYS: f64 = 3.0;

/// An assignee with at least this many active tasks counts as overloaded.
const OVERLOAD_THRESHOLD: usize = 3;

// ============================================================================
// Bundle types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Health of one upstream dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyRisk {
    pub task_id: TaskId,
    pub level: RiskLevel,
    /// Days past due, zero when not delayed.
    pub delay_days: f64,
    pub reason: String,
}

/// A human-readable recommendation with a stable tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub tag: String,
    pub message: String,
}

/// A scored assignee candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssigneeRecommendation {
    pub user_id: UserId,
    pub score: f64,
    pub reason: String,
    /// Whether the user is already assigned to the task.
    pub currently_assigned: bool,
}

/// Monte Carlo summary for one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSimulationSummary {
    pub finish_p50: DateTime<Utc>,
    pub finish_p95: DateTime<Utc>,
    pub cp_probability: f64,
}

/// Markov summary for one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskMarkovSummary {
    pub current_state: TaskStatus,
    pub expected_days_to_done: Option<f64>,
}

/// The fused intelligence bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntelligenceBundle {
    pub task_id: TaskId,
    /// 0-100; see [`risk_score`] for the formula.
    pub risk_score: u8,
    pub dependency_risks: Vec<DependencyRisk>,
    pub timeline_suggestions: Vec<Suggestion>,
    pub resource_suggestions: Vec<Suggestion>,
    pub optimal_assignees: Vec<AssigneeRecommendation>,
    pub monte_carlo: Option<TaskSimulationSummary>,
    pub markov: Option<TaskMarkovSummary>,
    /// Sub-computations that failed, as "section: message" entries.
    pub diagnostics: Vec<String>,
}

// ============================================================================
// Assembly
// ============================================================================

/// Assemble the intelligence bundle for one task.
///
/// `simulation` and `markov` are optional pre-computed inputs; omitted
/// sections are simply absent from the bundle (the caller decides whether
/// their absence was a failure and records it via `diagnostics`).
pub fn assemble(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    schedule: &CpmSchedule,
    calibration: &Calibration,
    task_id: &str,
    now: DateTime<Utc>,
    simulation: Option<&SimulationOutcome>,
    markov: Option<(&AbsorptionAnalysis, TaskStatus)>,
    mut diagnostics: Vec<String>,
) -> Result<IntelligenceBundle> {
    let task = snapshot.require_task(task_id)?;

    let dependency_risks = dependency_risks(snapshot, graph, schedule, task_id, now);
    let timeline_suggestions = timeline_suggestions(task, schedule, now);
    let (resource_suggestions, overload_count) = resource_pressure(snapshot, task, now);
    let optimal_assignees = recommend_assignees(snapshot, calibration, task, now);

    let high_risk_deps = dependency_risks
        .iter()
        .filter(|risk| risk.level == RiskLevel::High)
        .count() as u32;
    let on_cp = schedule.is_on_critical_path(task_id);
    let overdue = task.is_overdue(now);

    let risk_score = risk_score(
        high_risk_deps,
        timeline_suggestions.len() as u32,
        overload_count,
        on_cp,
        overdue,
    );

    let monte_carlo = simulation.and_then(|outcome| {
        let per_task = outcome.per_task.get(task_id)?;
        Some(TaskSimulationSummary {
            finish_p50: montecarlo::days_after(outcome.origin, per_task.finish_p50_days),
            finish_p95: montecarlo::days_after(outcome.origin, per_task.finish_p95_days),
            cp_probability: per_task.cp_frequency,
        })
    });

    let markov = markov.map(|(analysis, state)| {
        if let Some(diagnostic) = &analysis.diagnostic {
            diagnostics.push(format!("markov: {diagnostic}"));
        }
        TaskMarkovSummary {
            current_state: state,
            expected_days_to_done: analysis
                .expected_days_from(state)
                .filter(|days| days.is_finite()),
        }
    });

    Ok(IntelligenceBundle {
        task_id: task_id.to_string(),
        risk_score,
        dependency_risks,
        timeline_suggestions,
        resource_suggestions,
        optimal_assignees,
        monte_carlo,
        markov,
        diagnostics,
    })
}

/// round(min(100, 30H + 25T + 20R + 15C + 10O)), every factor count capped
/// at 3 before weighting.
pub fn risk_score(
    high_risk_deps: u32,
    timeline_risks: u32,
    resource_overloads: u32,
    on_critical_path: bool,
    overdue: bool,
) -> u8 {
    let h = high_risk_deps.min(FACTOR_CAP) as f64;
    let t = timeline_risks.min(FACTOR_CAP) as f64;
    let r = resource_overloads.min(FACTOR_CAP) as f64;
    let c = if on_critical_path { 1.0 } else { 0.0 };
    let o = if overdue { 1.0 } else { 0.0 };
    let raw = 30.0 * h + 25.0 * t + 20.0 * r + 15.0 * c + 10.0 * o;
    raw.min(100.0).round() as u8
}

fn dependency_risks(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    schedule: &CpmSchedule,
    task_id: &str,
    now: DateTime<Utc>,
) -> Vec<DependencyRisk> {
    let mut risks = Vec::new();
    for upstream_id in graph.upstream_closure(task_id) {
        let Some(upstream) = snapshot.get_task(&upstream_id) else {
            continue;
        };
        let delayed = upstream.is_overdue(now);
        let delay_days = if delayed {
            upstream
                .due
                .map(|due| ((now - due).num_seconds() as f64 / 86_400.0).floor().max(0.0))
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let blocked = upstream.status == TaskStatus::Blocked;
        let on_cp = schedule.is_on_critical_path(&upstream_id);

        let (level, reason) = if delayed && on_cp {
            (
                RiskLevel::High,
                format!("'{}' is {delay_days:.0} day(s) late on the critical path", upstream.title),
            )
        } else if delayed {
            (
                RiskLevel::Medium,
                format!("'{}' is {delay_days:.0} day(s) late", upstream.title),
            )
        } else if blocked {
            (RiskLevel::Medium, format!("'{}' is blocked", upstream.title))
        } else {
            (RiskLevel::Low, format!("'{}' is on track", upstream.title))
        };

        risks.push(DependencyRisk {
            task_id: upstream_id,
            level,
            delay_days,
            reason,
        });
    }
    risks
}

fn timeline_suggestions(task: &Task, schedule: &CpmSchedule, now: DateTime<Utc>) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    if task.is_overdue(now) {
        suggestions.push(Suggestion {
            tag: "overdue".into(),
            message: format!("'{}' is past due; replan or escalate", task.title),
        });
    }
    if let Some(due) = task.due {
        let days_left = (due - now).num_seconds() as f64 / 86_400.0;
        if (0.0..=AT_RISK_HORIZON_DAYS).contains(&days_left)
            && task.percent_complete < 50
            && !task.status.is_terminal()
        {
            suggestions.push(Suggestion {
                tag: "at-risk".into(),
                message: format!(
                    "'{}' is due in {days_left:.0} day(s) at {}% complete",
                    task.title, task.percent_complete
                ),
            });
        }
    }
    if schedule.is_on_critical_path(&task.id) {
        if let Some(slack) = schedule.slack_of(&task.id) {
            if slack < TIGHT_SLACK_DAYS {
                suggestions.push(Suggestion {
                    tag: "cp-tight".into(),
                    message: format!(
                        "'{}' sits on the critical path with {slack:.1} day(s) of slack",
                        task.title
                    ),
                });
            }
        }
    }
    suggestions
}

/// Resource suggestions plus the overload-indicator count feeding the risk
/// score.
fn resource_pressure(
    snapshot: &PlanSnapshot,
    task: &Task,
    now: DateTime<Utc>,
) -> (Vec<Suggestion>, u32) {
    let loads = active_loads(snapshot);
    let mut suggestions = Vec::new();
    let mut overloads = 0u32;
    for user in &task.assignees {
        let load = loads.get(user).copied().unwrap_or(0);
        if load >= OVERLOAD_THRESHOLD {
            overloads += 1;
            suggestions.push(Suggestion {
                tag: "overloaded-assignee".into(),
                message: format!("'{user}' already has {load} task(s) in progress"),
            });
        }
        let overdue_count = overdue_count(snapshot, user, now);
        if overdue_count > 0 {
            suggestions.push(Suggestion {
                tag: "assignee-overdue-backlog".into(),
                message: format!("'{user}' has {overdue_count} overdue task(s)"),
            });
        }
    }
    if task.assignees.is_empty() {
        suggestions.push(Suggestion {
            tag: "unassigned".into(),
            message: format!("'{}' has no assignee", task.title),
        });
    }
    (suggestions, overloads)
}

/// score = 0.5·completionRate − 0.3·load/maxLoad − 0.2·overdue/maxOverdue
fn recommend_assignees(
    snapshot: &PlanSnapshot,
    calibration: &Calibration,
    task: &Task,
    now: DateTime<Utc>,
) -> Vec<AssigneeRecommendation> {
    let loads = active_loads(snapshot);

    // Candidate pool: everyone seen in the plan or in history.
    let mut candidates: Vec<UserId> = snapshot
        .tasks
        .iter()
        .flat_map(|t| t.assignees.iter().cloned())
        .chain(calibration.assignee_stats.keys().cloned())
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_load = candidates
        .iter()
        .map(|u| loads.get(u).copied().unwrap_or(0))
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let overdue_counts: BTreeMap<&UserId, usize> = candidates
        .iter()
        .map(|u| (u, overdue_count(snapshot, u, now)))
        .collect();
    let max_overdue = overdue_counts.values().copied().max().unwrap_or(0).max(1) as f64;

    let mut recommendations: Vec<AssigneeRecommendation> = candidates
        .iter()
        .map(|user| {
            let completion_rate = calibration
                .assignee_stats
                .get(user)
                .map(|s| s.completion_rate())
                .unwrap_or(0.0);
            let load = loads.get(user).copied().unwrap_or(0) as f64;
            let overdue = overdue_counts[user] as f64;
            let score = 0.5 * completion_rate - 0.3 * load / max_load - 0.2 * overdue / max_overdue;
            AssigneeRecommendation {
                user_id: user.clone(),
                score,
                reason: format!(
                    "completion rate {:.0}%, {} active, {} overdue",
                    completion_rate * 100.0,
                    load as usize,
                    overdue as usize
                ),
                currently_assigned: task.assignees.contains(user),
            }
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .expect("scores are finite")
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    // Top three, keeping current assignees visible for reference.
    let mut top: Vec<AssigneeRecommendation> = recommendations.iter().take(3).cloned().collect();
    for current in recommendations.iter().filter(|r| r.currently_assigned) {
        if !top.iter().any(|r| r.user_id == current.user_id) {
            top.push(current.clone());
        }
    }
    top
}

fn active_loads(snapshot: &PlanSnapshot) -> BTreeMap<UserId, usize> {
    let mut loads: BTreeMap<UserId, usize> = BTreeMap::new();
    for task in &snapshot.tasks {
        if task.status == TaskStatus::InProgress {
            for user in &task.assignees {
                *loads.entry(user.clone()).or_insert(0) += 1;
            }
        }
    }
    loads
}

fn overdue_count(snapshot: &PlanSnapshot, user: &str, now: DateTime<Utc>) -> usize {
    snapshot
        .tasks
        .iter()
        .filter(|t| t.is_overdue(now) && t.assignees.iter().any(|u| u == user))
        .count()
}
