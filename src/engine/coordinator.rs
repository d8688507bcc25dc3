//! Claim and complete: the request-driven transitions.
//!
//! There is no in-process lock. Exclusivity comes from the store's
//! conditional update: of any number of concurrent claims on one `OPEN`
//! task, exactly one matches `status = OPEN AND assigned_to IS NULL`.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Instrument, debug};

use super::guard::ActiveClaimGuard;
use crate::audit::AuditTrail;
use crate::clock::Clock;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{Actor, AuditAction, AuditActor, AuditLogEntry, Status, Task, TaskId};
use crate::store::{ClaimOutcome, TaskStore};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_outcome, record_state_transition, start_task_span};

/// Claim limits.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Maximum tasks one user may hold in `IN_PROGRESS`.
    pub max_active: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self { max_active: 2 }
    }
}

#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn TaskStore>,
    guard: ActiveClaimGuard,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

impl ClaimCoordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        config: ClaimConfig,
    ) -> Self {
        Self {
            guard: ActiveClaimGuard::new(Arc::clone(&store), config.max_active),
            store,
            audit,
            clock,
        }
    }

    pub fn guard(&self) -> &ActiveClaimGuard {
        &self.guard
    }

    /// Assign an `OPEN` task to `actor`.
    ///
    /// # Errors
    ///
    /// - `LimitExceeded` if the actor already holds the maximum; nothing is written.
    /// - `NotFound` if the task does not exist.
    /// - `Conflict` if the task exists but is no longer claimable.
    pub async fn claim(&self, task_id: TaskId, actor: &Actor) -> Result<Task> {
        let span = start_task_span("claim", task_id);
        let result = self.try_claim(task_id, actor).instrument(span.clone()).await;

        let outcome = outcome_label(&result);
        record_outcome(&span, outcome);
        metrics::task_claims().add(1, &[KeyValue::new("result", outcome)]);

        if let Ok(ref task) = result {
            record_state_transition(&span, Status::Open, Status::InProgress);
            self.audit.record(AuditLogEntry::for_task(
                AuditAction::TaskClaimed,
                AuditActor::from(actor),
                task.id,
                format!("claimed by {}", actor.user_id),
                task.updated_at,
            ));
        }
        result
    }

    async fn try_claim(&self, task_id: TaskId, actor: &Actor) -> Result<Task> {
        let user = &actor.user_id;
        self.guard.check(user).await?;

        let now = self.clock.now();
        match self
            .store
            .claim(task_id, user, now, self.guard.max_active())
            .await?
        {
            ClaimOutcome::Claimed(task) => Ok(task),
            ClaimOutcome::AtCapacity { active } => {
                debug!(%user, active, "claim cap reached inside the atomic step");
                Err(Error::LimitExceeded {
                    user: user.clone(),
                    active,
                    limit: self.guard.max_active(),
                })
            }
            ClaimOutcome::Unmatched => match self.store.get(task_id).await? {
                Some(_) => Err(Error::Conflict(task_id)),
                None => Err(Error::NotFound(format!("task {task_id}"))),
            },
        }
    }

    /// Mark a task held by `actor` as `COMPLETED`.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` if the task is missing, not `IN_PROGRESS`, or
    /// held by someone else.
    pub async fn complete(&self, task_id: TaskId, actor: &Actor) -> Result<Task> {
        let span = start_task_span("complete", task_id);
        let now = self.clock.now();
        let result = async {
            self.store
                .complete(task_id, &actor.user_id, now)
                .await?
                .ok_or(Error::PreconditionFailed(task_id))
        }
        .instrument(span.clone())
        .await;

        let outcome = outcome_label(&result);
        record_outcome(&span, outcome);
        metrics::task_completions().add(1, &[KeyValue::new("result", outcome)]);

        if let Ok(ref task) = result {
            record_state_transition(&span, Status::InProgress, Status::Completed);
            self.audit.record(AuditLogEntry::for_task(
                AuditAction::TaskCompleted,
                AuditActor::from(actor),
                task.id,
                format!("completed by {}", actor.user_id),
                now,
            ));
        }
        result
    }
}

fn outcome_label(result: &Result<Task>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Internal => "error",
        },
    }
}
