//! Historical calibration.
//!
//! Fits the parameters the simulator and intelligence layers consume from
//! completed past plans: PERT triples per bucket (and per bucket/task-type),
//! planned-vs-actual bias, assignee throughput, bucket block rates, and
//! implicit-dependency hints mined from temporal precedence.
//!
//! Everything here is a pure function of the sample set and the config.

use std::collections::BTreeMap;

use confplan_core::{BucketId, HistoricalSample, PertTriple, TaskStatus, UserId};

/// Tuning knobs for calibration.
#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    /// Buckets with fewer samples fall back to the global prior.
    pub min_samples: usize,
    /// Prior used when a bucket (or the whole corpus) is too thin.
    pub global_prior: PertTriple,
    /// Minimum precedence confidence for an implicit-dependency hint.
    pub hint_confidence: f64,
    /// Minimum number of plans a pattern pair must co-occur in.
    pub hint_support: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            // Triangular 1/3/7-day prior for uncalibrated buckets.
            global_prior: PertTriple::default(),
            hint_confidence: 0.8,
            hint_support: 2,
        }
    }
}

/// Throughput profile of one assignee across the sample set.
#[derive(Clone, Debug, PartialEq)]
pub struct AssigneeStats {
    pub tasks_per_week: f64,
    pub mean_duration_days: f64,
    pub completed: usize,
    pub total: usize,
}

impl AssigneeStats {
    /// Fraction of this assignee's historical tasks that completed (vs.
    /// cancelled).
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Planned-vs-actual aggregate for one bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedVsActual {
    pub planned_mean_days: f64,
    pub actual_mean_days: f64,
    pub sample_count: usize,
}

/// An ordered pair of task-title patterns observed with consistent temporal
/// precedence: a candidate dependency the plan never declared.
#[derive(Clone, Debug, PartialEq)]
pub struct DependencyHint {
    pub predecessor_pattern: String,
    pub successor_pattern: String,
    /// Co-occurring instance pairs across all plans.
    pub support: usize,
    /// Fraction of co-occurrences where precedence held.
    pub confidence: f64,
}

/// Everything the historical analyzer derives.
#[derive(Clone, Debug, Default)]
pub struct Calibration {
    pub pert_by_bucket: BTreeMap<BucketId, PertTriple>,
    pub pert_by_bucket_type: BTreeMap<(BucketId, String), PertTriple>,
    /// Multiplicative bias: mean(actual) / mean(planned) per bucket.
    pub bias_by_bucket: BTreeMap<BucketId, f64>,
    /// blocked-sample count / total count per bucket.
    pub block_rate_by_bucket: BTreeMap<BucketId, f64>,
    pub assignee_stats: BTreeMap<UserId, AssigneeStats>,
    pub planned_vs_actual: BTreeMap<BucketId, PlannedVsActual>,
    pub dependency_hints: Vec<DependencyHint>,
    pub global_prior: PertTriple,
}

impl Calibration {
    /// PERT triple for a bucket, falling back to the global prior.
    pub fn pert_or_prior(&self, bucket: &str) -> PertTriple {
        self.pert_by_bucket
            .get(bucket)
            .copied()
            .unwrap_or(self.global_prior)
    }

    /// Bias factor for a bucket; 1.0 when unknown.
    pub fn bias(&self, bucket: &str) -> f64 {
        self.bias_by_bucket.get(bucket).copied().unwrap_or(1.0)
    }
}

/// Fit calibration parameters from historical samples.
pub fn calibrate(samples: &[HistoricalSample], config: &CalibrationConfig) -> Calibration {
    let mut calibration = Calibration {
        global_prior: config.global_prior,
        ..Calibration::default()
    };

    // Group actual durations by bucket and by (bucket, task-type).
    let mut by_bucket: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut by_bucket_type: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for sample in samples {
        by_bucket.entry(&sample.bucket).or_default().push(sample.actual_days);
        if let Some(task_type) = &sample.task_type {
            by_bucket_type
                .entry((&sample.bucket, task_type))
                .or_default()
                .push(sample.actual_days);
        }
    }

    for (bucket, mut durations) in by_bucket {
        let triple = fit_pert(&mut durations, config);
        calibration.pert_by_bucket.insert(bucket.to_string(), triple);
    }
    for ((bucket, task_type), mut durations) in by_bucket_type {
        let triple = fit_pert(&mut durations, config);
        calibration
            .pert_by_bucket_type
            .insert((bucket.to_string(), task_type.to_string()), triple);
    }

    // Bias, block rate and planned-vs-actual per bucket.
    let mut planned_sum: BTreeMap<&str, (f64, f64, usize, usize)> = BTreeMap::new();
    for sample in samples {
        let entry = planned_sum.entry(&sample.bucket).or_insert((0.0, 0.0, 0, 0));
        entry.0 += sample.planned_days;
        entry.1 += sample.actual_days;
        entry.2 += 1;
        if sample.block_count > 0 {
            entry.3 += 1;
        }
    }
    for (bucket, (planned, actual, count, blocked)) in planned_sum {
        let n = count as f64;
        calibration.planned_vs_actual.insert(
            bucket.to_string(),
            PlannedVsActual {
                planned_mean_days: planned / n,
                actual_mean_days: actual / n,
                sample_count: count,
            },
        );
        let bias = if planned > 0.0 { actual / planned } else { 1.0 };
        calibration.bias_by_bucket.insert(bucket.to_string(), bias);
        calibration
            .block_rate_by_bucket
            .insert(bucket.to_string(), blocked as f64 / n);
    }

    calibration.assignee_stats = assignee_stats(samples);
    calibration.dependency_hints = dependency_hints(samples, config);
    calibration
}

/// O/M/P = 10th/50th/90th percentile of the actual durations; thin buckets
/// take the prior.
fn fit_pert(durations: &mut [f64], config: &CalibrationConfig) -> PertTriple {
    if durations.len() < config.min_samples {
        return config.global_prior;
    }
    durations.sort_by(|a, b| a.partial_cmp(b).expect("durations are finite"));
    PertTriple {
        optimistic: percentile(durations, 10.0),
        most_likely: percentile(durations, 50.0),
        pessimistic: percentile(durations, 90.0),
    }
}

/// Nearest-rank percentile over a sorted slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn assignee_stats(samples: &[HistoricalSample]) -> BTreeMap<UserId, AssigneeStats> {
    #[derive(Default)]
    struct Acc {
        durations: Vec<f64>,
        completed: usize,
        total: usize,
        first: Option<chrono::DateTime<chrono::Utc>>,
        last: Option<chrono::DateTime<chrono::Utc>>,
    }

    let mut acc: BTreeMap<&UserId, Acc> = BTreeMap::new();
    for sample in samples {
        for user in &sample.assignees {
            let entry = acc.entry(user).or_default();
            entry.durations.push(sample.actual_days);
            entry.total += 1;
            if sample.terminal_status == TaskStatus::Completed {
                entry.completed += 1;
            }
            entry.first = Some(match entry.first {
                Some(f) => f.min(sample.finished_at),
                None => sample.finished_at,
            });
            entry.last = Some(match entry.last {
                Some(l) => l.max(sample.finished_at),
                None => sample.finished_at,
            });
        }
    }

    acc.into_iter()
        .map(|(user, a)| {
            let mean = a.durations.iter().sum::<f64>() / a.durations.len() as f64;
            let span_weeks = match (a.first, a.last) {
                (Some(first), Some(last)) => {
                    ((last - first).num_seconds() as f64 / 604_800.0).max(1.0)
                }
                _ => 1.0,
            };
            (
                user.clone(),
                AssigneeStats {
                    tasks_per_week: a.total as f64 / span_weeks,
                    mean_duration_days: mean,
                    completed: a.completed,
                    total: a.total,
                },
            )
        })
        .collect()
}

/// Mine ordered title-pattern pairs whose instances consistently finish
/// before the other starts.
fn dependency_hints(
    samples: &[HistoricalSample],
    config: &CalibrationConfig,
) -> Vec<DependencyHint> {
    // Pattern = lowercased title with digits stripped, so "Print badges v2"
    // and "print badges v3" fold together.
    let pattern_of = |title: &str| -> String {
        title
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_ascii_digit())
            .collect::<String>()
            .trim()
            .to_string()
    };

    let mut by_plan: BTreeMap<&str, Vec<&HistoricalSample>> = BTreeMap::new();
    for sample in samples {
        by_plan.entry(&sample.plan_id).or_default().push(sample);
    }

    // (pred pattern, succ pattern) -> (co-occurrence count, precedence count)
    let mut counts: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();
    for plan_samples in by_plan.values() {
        for a in plan_samples {
            for b in plan_samples.iter() {
                let pa = pattern_of(&a.title);
                let pb = pattern_of(&b.title);
                if pa.is_empty() || pb.is_empty() || pa == pb {
                    continue;
                }
                let entry = counts.entry((pa, pb)).or_insert((0, 0));
                entry.0 += 1;
                if let Some(b_start) = b.started_at {
                    if a.finished_at <= b_start {
                        entry.1 += 1;
                    }
                }
            }
        }
    }

    let mut hints: Vec<DependencyHint> = counts
        .into_iter()
        .filter_map(|((pred, succ), (co, before))| {
            if co < config.hint_support {
                return None;
            }
            let confidence = before as f64 / co as f64;
            (confidence >= config.hint_confidence).then_some(DependencyHint {
                predecessor_pattern: pred,
                successor_pattern: succ,
                support: co,
                confidence,
            })
        })
        .collect();
    hints.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .expect("confidence is finite")
            .then_with(|| b.support.cmp(&a.support))
            .then_with(|| a.predecessor_pattern.cmp(&b.predecessor_pattern))
    });
    hints
}
