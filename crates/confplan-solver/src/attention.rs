//! Attention views: what needs a planner's eyes right now.
//!
//! Pure derivations over the current snapshot (plus the CPM schedule for
//! the critical-path view). Each view is a count and a bounded list sorted
//! by due date ascending, ties by id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use confplan_core::{PlanSnapshot, Task, TaskId, TaskStatus};

use crate::cpm::CpmSchedule;
use crate::graph::TaskGraph;

/// Default bound on every view's task list.
pub const DEFAULT_VIEW_LIMIT: usize = 20;
/// "Due soon" horizon, in days.
pub const DUE_SOON_DAYS: i64 = 7;
/// Recently-changed fallback window when no sync state exists, in hours.
pub const RECENT_FALLBACK_HOURS: i64 = 24;

/// A slim task reference for attention lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: TaskId,
    pub title: String,
    pub due: Option<DateTime<Utc>>,
}

impl TaskRef {
    fn of(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            due: task.due,
        }
    }
}

/// One attention view: full count plus a bounded listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionView {
    pub count: usize,
    pub tasks: Vec<TaskRef>,
}

impl AttentionView {
    fn from_tasks(mut tasks: Vec<&Task>, limit: usize) -> Self {
        tasks.sort_by(|a, b| {
            // None due dates sort last; ties break by id.
            match (a.due, b.due) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.id.cmp(&b.id),
            }
        });
        Self {
            count: tasks.len(),
            tasks: tasks.into_iter().take(limit).map(TaskRef::of).collect(),
        }
    }
}

/// The full attention report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionReport {
    /// Blocked tasks, plus not-started tasks behind an incomplete
    /// predecessor.
    pub blockers: AttentionView,
    /// Open tasks past their due date.
    pub overdue: AttentionView,
    /// Open tasks due within the next seven days.
    pub due_soon: AttentionView,
    /// Due-soon tasks that also sit on the critical path.
    pub critical_due_soon: AttentionView,
    /// Tasks modified since the last sync (or the last 24h without one).
    pub recently_changed: AttentionView,
}

/// Derive the attention report for a plan.
pub fn derive(
    snapshot: &PlanSnapshot,
    graph: &TaskGraph,
    schedule: &CpmSchedule,
    now: DateTime<Utc>,
    limit: Option<usize>,
) -> AttentionReport {
    let limit = limit.unwrap_or(DEFAULT_VIEW_LIMIT);

    let incomplete = |task_id: &str| {
        snapshot
            .get_task(task_id)
            .map_or(false, |t| t.status != TaskStatus::Completed)
    };

    let blockers: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|task| {
            task.status == TaskStatus::Blocked
                || (task.status == TaskStatus::NotStarted
                    && graph
                        .predecessor_edges(&task.id)
                        .iter()
                        .any(|edge| incomplete(&edge.from)))
        })
        .collect();

    let overdue: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|task| task.is_overdue(now))
        .collect();

    let due_soon_cutoff = now + Duration::days(DUE_SOON_DAYS);
    let due_soon: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|task| {
            !task.status.is_terminal()
                && task
                    .due
                    .map_or(false, |due| due >= now && due <= due_soon_cutoff)
        })
        .collect();

    let critical_due_soon: Vec<&Task> = due_soon
        .iter()
        .copied()
        .filter(|task| schedule.is_on_critical_path(&task.id))
        .collect();

    let recent_cutoff = snapshot
        .plan
        .previous_sync_at
        .unwrap_or_else(|| now - Duration::hours(RECENT_FALLBACK_HOURS));
    let recently_changed: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|task| task.modified_at >= recent_cutoff && task.modified_at < now)
        .collect();

    AttentionReport {
        blockers: AttentionView::from_tasks(blockers, limit),
        overdue: AttentionView::from_tasks(overdue, limit),
        due_soon: AttentionView::from_tasks(due_soon, limit),
        critical_due_soon: AttentionView::from_tasks(critical_due_soon, limit),
        recently_changed: AttentionView::from_tasks(recently_changed, limit),
    }
}

// ============================================================================
// Milestone analysis
// ============================================================================

/// Tasks split by whether their forecast finish clears the event date.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MilestoneAnalysis {
    /// Forecast to finish on or before the event date.
    pub before: Vec<TaskRef>,
    /// Forecast after the event date, already overdue, or blocked.
    pub at_risk: Vec<TaskRef>,
}

/// Classify every open task against the event date using CPM forecasts.
pub fn milestone_analysis(
    snapshot: &PlanSnapshot,
    schedule: &CpmSchedule,
    origin: DateTime<Utc>,
    event_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MilestoneAnalysis {
    let budget_days = (event_date - origin).num_seconds() as f64 / 86_400.0;
    let mut analysis = MilestoneAnalysis::default();
    let mut tasks: Vec<&Task> = snapshot.tasks.iter().collect();
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    for task in tasks {
        if task.status.is_terminal() {
            continue;
        }
        let forecast_finish = schedule
            .results
            .get(&task.id)
            .map(|r| r.early_finish)
            .unwrap_or(0.0);
        let risky = forecast_finish > budget_days
            || task.is_overdue(now)
            || task.status == TaskStatus::Blocked;
        if risky {
            analysis.at_risk.push(TaskRef::of(task));
        } else {
            analysis.before.push(TaskRef::of(task));
        }
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use confplan_core::{Dependency, Plan};
    use pretty_assertions::assert_eq;

    use crate::cpm::DurationModel;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
    }

    fn report_for(snapshot: &PlanSnapshot) -> AttentionReport {
        let (graph, _) = TaskGraph::build_lenient(snapshot);
        let schedule = crate::cpm::compute(snapshot, &graph, &DurationModel::default());
        derive(snapshot, &graph, &schedule, now(), None)
    }

    fn base_snapshot(tasks: Vec<Task>, dependencies: Vec<Dependency>) -> PlanSnapshot {
        PlanSnapshot {
            plan: Plan::new("p", "Plan"),
            buckets: Vec::new(),
            tasks,
            dependencies,
        }
    }

    #[test]
    fn blocked_status_and_blocked_by_predecessor() {
        let snapshot = base_snapshot(
            vec![
                Task::new("a", "hard-blocked").status(TaskStatus::Blocked),
                Task::new("b", "upstream"),
                Task::new("c", "waiting"),
                Task::new("d", "free"),
            ],
            vec![Dependency::new("b", "c")],
        );
        let report = report_for(&snapshot);
        let ids: Vec<_> = report.blockers.tasks.iter().map(|t| &t.task_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn overdue_and_due_soon_are_disjoint() {
        let snapshot = base_snapshot(
            vec![
                Task::new("late", "late").due(now() - Duration::days(1)),
                Task::new("soon", "soon").due(now() + Duration::days(3)),
                Task::new("far", "far").due(now() + Duration::days(30)),
                Task::new("done", "done")
                    .due(now() - Duration::days(2))
                    .completed_at(now() - Duration::days(2)),
            ],
            vec![],
        );
        let report = report_for(&snapshot);
        assert_eq!(report.overdue.count, 1);
        assert_eq!(report.overdue.tasks[0].task_id, "late");
        assert_eq!(report.due_soon.count, 1);
        assert_eq!(report.due_soon.tasks[0].task_id, "soon");

        // Invariant: overdue and due-soon never overlap.
        for task in &report.overdue.tasks {
            assert!(!report.due_soon.tasks.contains(task));
        }
    }

    #[test]
    fn critical_due_soon_intersects_cp() {
        // chain: a -> b; both due soon; both critical. c is independent
        // slack-free but also critical (single-node path).
        let snapshot = base_snapshot(
            vec![
                Task::new("a", "a").due(now() + Duration::days(2)),
                Task::new("b", "b").due(now() + Duration::days(4)),
            ],
            vec![Dependency::new("a", "b")],
        );
        let report = report_for(&snapshot);
        assert_eq!(report.critical_due_soon.count, 2);
    }

    #[test]
    fn recently_changed_uses_sync_state() {
        let mut snapshot = base_snapshot(
            vec![Task::new("old", "old"), Task::new("fresh", "fresh")],
            vec![],
        );
        snapshot.tasks[0].modified_at = now() - Duration::days(10);
        snapshot.tasks[1].modified_at = now() - Duration::hours(2);

        // No sync state: 24h fallback window.
        let report = report_for(&snapshot);
        assert_eq!(report.recently_changed.count, 1);
        assert_eq!(report.recently_changed.tasks[0].task_id, "fresh");

        // With sync state the window widens.
        snapshot.plan.previous_sync_at = Some(now() - Duration::days(30));
        let report = report_for(&snapshot);
        assert_eq!(report.recently_changed.count, 2);
    }

    #[test]
    fn views_are_bounded_and_sorted() {
        let tasks: Vec<Task> = (0..30)
            .map(|i| {
                Task::new(format!("t{i:02}"), "t").due(now() + Duration::days(1 + i64::from(i % 3)))
            })
            .collect();
        let snapshot = base_snapshot(tasks, vec![]);
        let report = report_for(&snapshot);
        assert_eq!(report.due_soon.count, 30);
        assert_eq!(report.due_soon.tasks.len(), 20);
        // Sorted by due then id.
        for pair in report.due_soon.tasks.windows(2) {
            assert!(
                (pair[0].due, &pair[0].task_id) <= (pair[1].due, &pair[1].task_id)
            );
        }
    }

    #[test]
    fn empty_plan_has_zero_counts() {
        let snapshot = base_snapshot(vec![], vec![]);
        let report = report_for(&snapshot);
        assert_eq!(report.blockers.count, 0);
        assert_eq!(report.overdue.count, 0);
        assert_eq!(report.due_soon.count, 0);
        assert_eq!(report.critical_due_soon.count, 0);
        assert_eq!(report.recently_changed.count, 0);
    }

    #[test]
    fn milestone_analysis_splits_on_event_date() {
        let origin = now();
        let event = now() + Duration::days(3);
        let snapshot = base_snapshot(
            vec![
                // 2-day task: fits before the event.
                Task::new("fits", "fits").start(origin).due(origin + Duration::days(2)),
                // 6-day task: misses it.
                Task::new("miss", "miss").start(origin).due(origin + Duration::days(6)),
                Task::new("stuck", "stuck")
                    .status(TaskStatus::Blocked)
                    .start(origin)
                    .due(origin + Duration::days(1)),
            ],
            vec![],
        );
        let (graph, _) = TaskGraph::build_lenient(&snapshot);
        let schedule = crate::cpm::compute(&snapshot, &graph, &DurationModel::default());
        let analysis = milestone_analysis(&snapshot, &schedule, origin, event, now());
        let before: Vec<_> = analysis.before.iter().map(|t| &t.task_id).collect();
        let at_risk: Vec<_> = analysis.at_risk.iter().map(|t| &t.task_id).collect();
        assert_eq!(before, vec!["fits"]);
        assert_eq!(at_risk, vec!["miss", "stuck"]);
    }
}
