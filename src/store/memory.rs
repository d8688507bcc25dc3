//! In-process store.
//!
//! One lock guards the whole task table, which makes every conditional
//! update (including the claim's count-and-write) a single atomic step.
//! Used by tests and by embedders that do not need durability.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ClaimOutcome, ProjectCatalog, ReleasedClaim, TaskFilter, TaskStore};
use crate::audit::AuditSink;
use crate::error::Result;
use crate::model::{AuditLogEntry, ProjectId, Task, TaskId, UserId};

#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    projects: Mutex<HashSet<ProjectId>>,
    audit: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project so tasks can be created under it.
    pub async fn add_project(&self, id: impl Into<String>) {
        self.projects.lock().await.insert(ProjectId::new(id));
    }

    /// Replace a stored task wholesale. Lets tests set up states such as
    /// backdated claims.
    pub async fn put(&self, task: Task) {
        self.tasks.lock().await.insert(task.id, task);
    }

    /// Every audit entry, in append order.
    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.lock().await.clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        Ok(self.tasks.lock().await.remove(&id).is_some())
    }

    async fn list(&self, filter: &TaskFilter, offset: u64, limit: u64) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        let mut matching: Vec<&Task> = tasks.values().filter(|t| filter.matches(t)).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as u64)
    }

    async fn claim(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
        max_active: u32,
    ) -> Result<ClaimOutcome> {
        let mut tasks = self.tasks.lock().await;

        let active = tasks.values().filter(|t| t.is_active_for(user)).count() as u64;
        if active >= u64::from(max_active) {
            return Ok(ClaimOutcome::AtCapacity { active });
        }

        let Some(task) = tasks.get_mut(&id) else {
            return Ok(ClaimOutcome::Unmatched);
        };
        match task.claimed(user, now) {
            Some(next) => {
                *task = next.clone();
                Ok(ClaimOutcome::Claimed(next))
            }
            None => Ok(ClaimOutcome::Unmatched),
        }
    }

    async fn complete(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(None);
        };
        let next = task.completed(user, now);
        if let Some(ref next) = next {
            *task = next.clone();
        }
        Ok(next)
    }

    async fn expire_open(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let mut tasks = self.tasks.lock().await;
        let mut changed = Vec::new();
        for task in tasks.values_mut() {
            if let Some(next) = task.expired(cutoff, now) {
                changed.push(task.id);
                *task = next;
            }
        }
        changed.sort();
        Ok(changed)
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedClaim>> {
        let mut tasks = self.tasks.lock().await;
        let mut released = Vec::new();
        for task in tasks.values_mut() {
            let Some(owner) = task.assigned_to().cloned() else {
                continue;
            };
            if let Some(next) = task.released(cutoff, now) {
                released.push(ReleasedClaim {
                    id: task.id,
                    previous_owner: owner,
                });
                *task = next;
            }
        }
        released.sort_by_key(|r| r.id);
        Ok(released)
    }
}

#[async_trait]
impl ProjectCatalog for MemoryStore {
    async fn project_exists(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.projects.lock().await.contains(id))
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn entries_for(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>> {
        let audit = self.audit.lock().await;
        let mut entries: Vec<AuditLogEntry> = audit
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}
