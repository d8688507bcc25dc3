//! Persistence ports for task records.
//!
//! Every state-changing method is a conditional write: it mutates a record
//! only if the record still matches the transition's predicate at the moment
//! of the write, and reports which records it actually changed. Callers never
//! read-then-write across two calls to decide a transition.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{ProjectId, Status, Task, TaskId, UserId};

pub use memory::MemoryStore;

/// Filters for task listings. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub assigned_to: Option<UserId>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn assigned_to(mut self, user: UserId) -> Self {
        self.assigned_to = Some(user);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status() == s)
            && self
                .assigned_to
                .as_ref()
                .is_none_or(|u| task.assigned_to() == Some(u))
            && self.created_from.is_none_or(|from| task.created_at >= from)
            && self.created_to.is_none_or(|to| task.created_at <= to)
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The task moved to `IN_PROGRESS` for the caller.
    Claimed(Task),
    /// The caller already holds `active` tasks; nothing was written.
    AtCapacity { active: u64 },
    /// No record matched `id = ? AND status = OPEN AND assigned_to IS NULL`.
    Unmatched,
}

/// A stale claim released back to `OPEN` by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedClaim {
    pub id: TaskId,
    pub previous_owner: UserId,
}

/// Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<()>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Remove a task. Returns `false` if it did not exist.
    async fn delete(&self, id: TaskId) -> Result<bool>;

    /// Tasks matching `filter`, oldest first.
    async fn list(&self, filter: &TaskFilter, offset: u64, limit: u64) -> Result<Vec<Task>>;

    async fn count(&self, filter: &TaskFilter) -> Result<u64>;

    /// Number of tasks `user` currently holds in `IN_PROGRESS`.
    async fn count_active(&self, user: &UserId) -> Result<u64> {
        self.count(
            &TaskFilter::default()
                .status(Status::InProgress)
                .assigned_to(user.clone()),
        )
        .await
    }

    /// Claim `id` for `user` if it is `OPEN` and unassigned and `user` holds
    /// fewer than `max_active` tasks, as one atomic step.
    async fn claim(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
        max_active: u32,
    ) -> Result<ClaimOutcome>;

    /// Complete `id` if it is `IN_PROGRESS` and owned by `user`. `None` when
    /// no record matched.
    async fn complete(&self, id: TaskId, user: &UserId, now: DateTime<Utc>)
    -> Result<Option<Task>>;

    /// Move every `OPEN` task created at or before `cutoff` to `EXPIRED`.
    /// Returns exactly the ids this call changed.
    async fn expire_open(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<TaskId>>;

    /// Move every `IN_PROGRESS` task claimed at or before `cutoff` back to
    /// `OPEN`, clearing its owner. Returns exactly the claims this call released.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedClaim>>;
}

/// Read-only view of the project registry, consulted at task creation.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn project_exists(&self, id: &ProjectId) -> Result<bool>;
}
