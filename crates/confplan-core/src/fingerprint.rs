//! Content fingerprints for dirty tracking and cache invalidation.
//!
//! A fingerprint is the SHA-256 of a canonical JSON encoding of the
//! materially-tracked fields. Two tasks with the same tracked content hash
//! identically regardless of bookkeeping fields (timestamps, creators), so
//! the plan fingerprint changes exactly when content a sync peer cares
//! about changes.

use sha2::{Digest, Sha256};

use crate::repo::PlanSnapshot;
use crate::Task;

/// Hex-encoded SHA-256 over a task's materially-tracked fields.
pub fn task_fingerprint(task: &Task) -> String {
    let mut hasher = Sha256::new();
    // Field-by-field feed with separators keeps the encoding canonical
    // without depending on serde field order.
    feed(&mut hasher, &task.id);
    feed(&mut hasher, &task.title);
    feed(&mut hasher, &task.bucket_id);
    feed(&mut hasher, &format!("{:?}", task.status));
    feed(&mut hasher, &task.percent_complete.to_string());
    feed(&mut hasher, &instant(task.start));
    feed(&mut hasher, &instant(task.due));
    feed(&mut hasher, &instant(task.completed));
    feed(&mut hasher, &task.priority.to_string());
    for user in &task.assignees {
        feed(&mut hasher, user);
    }
    // Categories are a BTreeSet: iteration order is already canonical.
    for label in &task.categories {
        feed(&mut hasher, label);
    }
    feed(&mut hasher, &task.description);
    feed(&mut hasher, &task.order_hint);
    for subtask in &task.subtasks {
        feed(&mut hasher, &subtask.id);
        feed(&mut hasher, &subtask.title);
        feed(&mut hasher, if subtask.checked { "1" } else { "0" });
        feed(&mut hasher, &subtask.order_hint);
    }
    hex(hasher.finalize().as_slice())
}

/// Hex-encoded SHA-256 over the whole plan content: sorted task
/// fingerprints plus the dependency edge set.
pub fn plan_fingerprint(snapshot: &PlanSnapshot) -> String {
    let mut task_prints: Vec<String> = snapshot.tasks.iter().map(task_fingerprint).collect();
    task_prints.sort_unstable();

    let mut edges: Vec<String> = snapshot
        .dependencies
        .iter()
        .map(|d| format!("{}>{}:{}", d.predecessor, d.successor, d.dep_type))
        .collect();
    edges.sort_unstable();

    let mut hasher = Sha256::new();
    feed(&mut hasher, &snapshot.plan.id);
    for print in &task_prints {
        feed(&mut hasher, print);
    }
    for edge in &edges {
        feed(&mut hasher, edge);
    }
    hex(hasher.finalize().as_slice())
}

fn feed(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

fn instant(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value.map(|v| v.to_rfc3339()).unwrap_or_default()
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dependency, Plan, Task};

    fn snapshot_of(tasks: Vec<Task>, dependencies: Vec<Dependency>) -> PlanSnapshot {
        PlanSnapshot {
            plan: Plan::new("p1", "Plan"),
            buckets: Vec::new(),
            tasks,
            dependencies,
        }
    }

    #[test]
    fn identical_content_hashes_identically() {
        let a = Task::new("t1", "Book venue").assign("alice");
        let b = Task::new("t1", "Book venue").assign("alice");
        assert_eq!(task_fingerprint(&a), task_fingerprint(&b));
    }

    #[test]
    fn tracked_field_changes_fingerprint() {
        let a = Task::new("t1", "Book venue");
        let b = Task::new("t1", "Book venue").percent(0).description("updated");
        assert_ne!(task_fingerprint(&a), task_fingerprint(&b));
    }

    #[test]
    fn bookkeeping_fields_do_not_change_fingerprint() {
        let a = Task::new("t1", "Book venue");
        let mut b = a.clone();
        b.modified_at = chrono::Utc::now();
        b.created_by = Some("carol".into());
        assert_eq!(task_fingerprint(&a), task_fingerprint(&b));
    }

    #[test]
    fn plan_fingerprint_is_order_independent() {
        let t1 = Task::new("t1", "A");
        let t2 = Task::new("t2", "B");
        let fwd = plan_fingerprint(&snapshot_of(vec![t1.clone(), t2.clone()], vec![]));
        let rev = plan_fingerprint(&snapshot_of(vec![t2, t1], vec![]));
        assert_eq!(fwd, rev);
    }

    #[test]
    fn plan_fingerprint_tracks_edges() {
        let t1 = Task::new("t1", "A");
        let t2 = Task::new("t2", "B");
        let without = plan_fingerprint(&snapshot_of(vec![t1.clone(), t2.clone()], vec![]));
        let with = plan_fingerprint(&snapshot_of(
            vec![t1, t2],
            vec![Dependency::new("t1", "t2")],
        ));
        assert_ne!(without, with);
    }

    #[test]
    fn length_prefixing_prevents_field_bleed() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = Task::new("ab", "c");
        let b = Task::new("a", "bc");
        assert_ne!(task_fingerprint(&a), task_fingerprint(&b));
    }
}
