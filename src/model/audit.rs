//! Audit log entries. Append-only; one per lifecycle transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::{Actor, Role, UserId};
use super::task::TaskId;

/// Identity string written for sweeper-originated entries.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Resource type recorded for task entries.
pub const TASK_RESOURCE: &str = "Task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TaskClaimed,
    TaskCreated,
    TaskCompleted,
    TaskExpired,
    TaskReassigned,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::TaskClaimed => "TASK_CLAIMED",
            AuditAction::TaskCreated => "TASK_CREATED",
            AuditAction::TaskCompleted => "TASK_COMPLETED",
            AuditAction::TaskExpired => "TASK_EXPIRED",
            AuditAction::TaskReassigned => "TASK_REASSIGNED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK_CLAIMED" => Ok(AuditAction::TaskClaimed),
            "TASK_CREATED" => Ok(AuditAction::TaskCreated),
            "TASK_COMPLETED" => Ok(AuditAction::TaskCompleted),
            "TASK_EXPIRED" => Ok(AuditAction::TaskExpired),
            "TASK_REASSIGNED" => Ok(AuditAction::TaskReassigned),
            _ => Err(crate::error::Error::Other(format!("unknown audit action: {s}"))),
        }
    }
}

/// Who caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditActor {
    User {
        user_id: UserId,
        email: String,
        role: Role,
    },
    /// The lifecycle sweeper.
    System,
}

impl AuditActor {
    /// `(user_id, user_email, user_role)` as written to storage.
    pub fn columns(&self) -> (String, String, String) {
        match self {
            AuditActor::User {
                user_id,
                email,
                role,
            } => (user_id.to_string(), email.clone(), role.to_string()),
            AuditActor::System => (
                SYSTEM_ACTOR.to_string(),
                SYSTEM_ACTOR.to_string(),
                SYSTEM_ACTOR.to_string(),
            ),
        }
    }

    /// Inverse of [`columns`](Self::columns). Only the full sentinel triple
    /// reads back as `System`; a user whose id happens to be `SYSTEM` still
    /// carries a real role.
    pub fn from_columns(user_id: String, email: String, role: &str) -> crate::error::Result<Self> {
        if user_id == SYSTEM_ACTOR && role == SYSTEM_ACTOR {
            return Ok(AuditActor::System);
        }
        Ok(AuditActor::User {
            user_id: UserId(user_id),
            email,
            role: role.parse()?,
        })
    }
}

impl From<&Actor> for AuditActor {
    fn from(actor: &Actor) -> Self {
        AuditActor::User {
            user_id: actor.user_id.clone(),
            email: actor.email.clone(),
            role: actor.role,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub actor: AuditActor,
    pub resource_type: String,
    /// Plain id, not a foreign key: history outlives the resource.
    pub resource_id: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Entry about a task.
    pub fn for_task(
        action: AuditAction,
        actor: AuditActor,
        task_id: TaskId,
        details: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            actor,
            resource_type: TASK_RESOURCE.to_string(),
            resource_id: task_id.to_string(),
            details: details.into(),
            timestamp,
        }
    }

    pub fn is_system(&self) -> bool {
        self.actor == AuditActor::System
    }
}
