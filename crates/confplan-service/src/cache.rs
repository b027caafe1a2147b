//! Advisory memoization of analytical results.
//!
//! Entries are keyed by (plan, content fingerprint, parameter string): a
//! mutation changes the fingerprint, so stale entries simply stop matching.
//! `invalidate_plan` additionally drops a plan's rows eagerly to bound
//! growth. A miss is always safe: callers recompute.

use std::collections::HashMap;

use parking_lot::Mutex;

/// A fingerprint-guarded cache.
pub struct MemoCache<V: Clone> {
    entries: Mutex<HashMap<(String, String, String), V>>,
}

impl<V: Clone> Default for MemoCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> MemoCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, plan_id: &str, fingerprint: &str, params: &str) -> Option<V> {
        self.entries
            .lock()
            .get(&(plan_id.to_string(), fingerprint.to_string(), params.to_string()))
            .cloned()
    }

    pub fn put(&self, plan_id: &str, fingerprint: &str, params: &str, value: V) {
        self.entries.lock().insert(
            (plan_id.to_string(), fingerprint.to_string(), params.to_string()),
            value,
        );
    }

    /// Drop every entry belonging to a plan.
    pub fn invalidate_plan(&self, plan_id: &str) {
        self.entries.lock().retain(|(plan, _, _), _| plan != plan_id);
    }
}
