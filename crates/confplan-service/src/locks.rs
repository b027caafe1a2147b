//! Advisory task locks with TTL expiry.
//!
//! State machine per (plan, task): `Unlocked -> Locked(holder, t0, ttl)`.
//! Re-acquiring as the holder renews; acquiring against a live foreign lock
//! fails with `LockedByOther`. Expiry is evaluated lazily against the
//! caller-supplied `now` on every operation, so no background sweeper is
//! needed and tests control the clock directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use confplan_core::{PlanError, Repository, Result, TaskLock, DEFAULT_LOCK_TTL_SECS};

/// The lock manager. Cheap to clone; all state lives in the repository's
/// lock table.
#[derive(Clone)]
pub struct LockManager {
    repo: Arc<dyn Repository>,
}

impl LockManager {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Acquire or renew a lock.
    ///
    /// Fails with `LockedByOther` when a live lock is held by someone else,
    /// and with `TaskNotFound` when the task does not exist.
    pub fn acquire(
        &self,
        plan_id: &str,
        task_id: &str,
        user: &str,
        ttl_secs: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<TaskLock> {
        self.repo.load_plan(plan_id)?.require_task(task_id)?;

        if let Some(existing) = self.live_lock(plan_id, task_id, now)? {
            if existing.holder != user {
                return Err(PlanError::LockedByOther {
                    task: task_id.to_string(),
                    holder: existing.holder,
                    acquired_at: existing.acquired_at,
                });
            }
            debug!(plan_id, task_id, user, "renewing lock");
        }

        let lock = TaskLock::new(
            plan_id,
            task_id,
            user,
            now,
            ttl_secs.unwrap_or(DEFAULT_LOCK_TTL_SECS),
        );
        self.repo.put_lock(lock.clone())?;
        Ok(lock)
    }

    /// Release a held lock. Fails with `NotHolder` when the caller does not
    /// hold a live lock.
    pub fn release(
        &self,
        plan_id: &str,
        task_id: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.live_lock(plan_id, task_id, now)? {
            Some(lock) if lock.holder == user => self.repo.remove_lock(plan_id, task_id),
            _ => Err(PlanError::NotHolder(task_id.to_string())),
        }
    }

    /// The live lock on a task, if any. Expired rows are removed as a side
    /// effect (lazy expiry).
    pub fn get(
        &self,
        plan_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskLock>> {
        self.live_lock(plan_id, task_id, now)
    }

    /// The C11 mutation contract: proceed only with no lock or a lock held
    /// by the caller.
    pub fn ensure_writable(
        &self,
        plan_id: &str,
        task_id: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.live_lock(plan_id, task_id, now)? {
            Some(lock) if lock.holder != user => Err(PlanError::LockedByOther {
                task: task_id.to_string(),
                holder: lock.holder,
                acquired_at: lock.acquired_at,
            }),
            _ => Ok(()),
        }
    }

    fn live_lock(
        &self,
        plan_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskLock>> {
        match self.repo.get_lock(plan_id, task_id)? {
            Some(lock) if lock.is_expired(now) => {
                self.repo.remove_lock(plan_id, task_id)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }
}
