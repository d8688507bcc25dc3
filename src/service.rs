//! Application-facing task operations.
//!
//! [`TaskService`] is what an API layer or the CLI talks to. It adds the
//! collaborators around the engine: the claim rate limiter, project checks at
//! creation, listing, deletion and audit history.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::clock::Clock;
use crate::config::Settings;
use crate::engine::{ClaimConfig, ClaimCoordinator, LifecycleConfig, LifecycleSweeper};
use crate::error::{Error, Result};
use crate::model::{
    Actor, AuditAction, AuditActor, AuditLogEntry, NewTask, Status, Task, TaskId, UserId,
};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::store::{ProjectCatalog, TaskFilter, TaskStore};
use crate::telemetry::metrics;

const DEFAULT_PAGE_SIZE: u64 = 10;

/// Everything tunable about the service, passed in at construction.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub claim: ClaimConfig,
    pub rate_limit: RateLimitConfig,
    pub lifecycle: LifecycleConfig,
}

impl From<&Settings> for ServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            claim: settings.claim(),
            rate_limit: settings.rate_limit(),
            lifecycle: settings.lifecycle(),
        }
    }
}

/// Listing query. Dates are whole UTC days, both ends inclusive.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub status: Option<Status>,
    pub assigned_to: Option<UserId>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    /// 1-based; 0 is treated as 1.
    pub page: u64,
    /// 0 means the default of 10.
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub tasks: Vec<Task>,
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    projects: Arc<dyn ProjectCatalog>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    coordinator: ClaimCoordinator,
    limiter: Arc<RateLimiter>,
    lifecycle: LifecycleConfig,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        projects: Arc<dyn ProjectCatalog>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let coordinator = ClaimCoordinator::new(
            Arc::clone(&store),
            audit.clone(),
            Arc::clone(&clock),
            config.claim,
        );
        let limiter = Arc::new(RateLimiter::new(config.rate_limit, Arc::clone(&clock)));
        Self {
            store,
            projects,
            audit,
            clock,
            coordinator,
            limiter,
            lifecycle: config.lifecycle,
        }
    }

    /// A sweeper over the same store, audit trail and clock. Its ticks also
    /// purge this service's idle rate-limit windows.
    pub fn sweeper(&self) -> LifecycleSweeper {
        LifecycleSweeper::new(
            Arc::clone(&self.store),
            self.audit.clone(),
            Arc::clone(&self.clock),
            self.lifecycle.clone(),
        )
        .with_rate_limiter(Arc::clone(&self.limiter))
    }

    pub fn coordinator(&self) -> &ClaimCoordinator {
        &self.coordinator
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Create an `OPEN` task under an existing project.
    pub async fn create_task(&self, actor: &Actor, new: NewTask) -> Result<Task> {
        if !self.projects.project_exists(new.project_id()).await? {
            return Err(Error::NotFound(format!("project {}", new.project_id())));
        }

        let task = Task::open(new, self.clock.now(), self.lifecycle.expire_after);
        self.store.insert(&task).await?;
        info!(task_id = %task.id, project_id = %task.project_id, "task created");

        self.audit.record(AuditLogEntry::for_task(
            AuditAction::TaskCreated,
            AuditActor::from(actor),
            task.id,
            format!("created \"{}\" in project {}", task.title, task.project_id),
            task.created_at,
        ));
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    pub async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage> {
        let page = query.page.max(1);
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };

        let filter = TaskFilter {
            status: query.status,
            assigned_to: query.assigned_to.clone(),
            created_from: query.from_date.map(start_of_day),
            created_to: query.to_date.map(end_of_day),
        };

        let total_items = self.store.count(&filter).await?;
        // A page whose offset does not fit in u64 lies past any real data.
        let tasks = match (page - 1).checked_mul(page_size) {
            Some(offset) if offset < total_items => {
                self.store.list(&filter, offset, page_size).await?
            }
            _ => Vec::new(),
        };

        Ok(TaskPage {
            total_items,
            total_pages: total_items.div_ceil(page_size),
            current_page: page,
            tasks,
        })
    }

    /// Rate-limited claim.
    pub async fn claim_task(&self, id: TaskId, actor: &Actor) -> Result<Task> {
        if let Err(e) = self.limiter.check(actor.user_id.as_str()) {
            warn!(user = %actor.user_id, task_id = %id, "claim rejected by rate limiter");
            metrics::task_claims().add(1, &[KeyValue::new("result", "rate_limited")]);
            return Err(e);
        }
        self.coordinator.claim(id, actor).await
    }

    pub async fn complete_task(&self, id: TaskId, actor: &Actor) -> Result<Task> {
        self.coordinator.complete(id, actor).await
    }

    /// Remove a task. Its audit history is kept.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(Error::NotFound(format!("task {id}")));
        }
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Audit entries for a task, oldest first. Works for deleted tasks too.
    pub async fn audit_history(&self, id: TaskId) -> Result<Vec<AuditLogEntry>> {
        self.audit.history(&id.to_string()).await
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::nanoseconds(1)
}
