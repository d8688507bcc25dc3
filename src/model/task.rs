//! Task records and their lifecycle state machine.
//!
//! ```text
//! OPEN --claim--> IN_PROGRESS --complete--> COMPLETED
//! OPEN --sweep (age >= 24h)--> EXPIRED
//! IN_PROGRESS --sweep (claim age >= 48h)--> OPEN
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::UserId;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

/// Project reference. Existence is checked once, at task creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task, without the per-state data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Unassigned and claimable.
    Open,
    /// Held by exactly one user.
    InProgress,
    /// Never claimed within its window. Terminal.
    Expired,
    /// Finished by its owner. Terminal.
    Completed,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Open, InProgress)          // claim
                | (Open, Expired)       // sweep: unclaimed past cutoff
                | (InProgress, Completed)
                | (InProgress, Open) // sweep: stale claim released
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Expired | Status::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "OPEN",
            Status::InProgress => "IN_PROGRESS",
            Status::Expired => "EXPIRED",
            Status::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Status::Open),
            "IN_PROGRESS" => Ok(Status::InProgress),
            "EXPIRED" => Ok(Status::Expired),
            "COMPLETED" => Ok(Status::Completed),
            _ => Err(crate::error::Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Status plus the fields whose presence depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Open,
    InProgress {
        assigned_to: UserId,
        claimed_at: DateTime<Utc>,
    },
    Expired,
    Completed {
        assigned_to: UserId,
        completed_at: DateTime<Utc>,
    },
}

impl TaskState {
    pub fn status(&self) -> Status {
        match self {
            TaskState::Open => Status::Open,
            TaskState::InProgress { .. } => Status::InProgress,
            TaskState::Expired => Status::Expired,
            TaskState::Completed { .. } => Status::Completed,
        }
    }

    /// Rebuild a state from its flattened storage columns.
    ///
    /// Returns `None` when the columns contradict the status, e.g. an `OPEN`
    /// row that still names an assignee.
    pub fn from_parts(
        status: Status,
        assigned_to: Option<UserId>,
        claimed_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        match (status, assigned_to, claimed_at, completed_at) {
            (Status::Open, None, None, None) => Some(TaskState::Open),
            (Status::Expired, None, None, None) => Some(TaskState::Expired),
            (Status::InProgress, Some(assigned_to), Some(claimed_at), None) => {
                Some(TaskState::InProgress {
                    assigned_to,
                    claimed_at,
                })
            }
            (Status::Completed, Some(assigned_to), None, Some(completed_at)) => {
                Some(TaskState::Completed {
                    assigned_to,
                    completed_at,
                })
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A claimable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub project_id: ProjectId,

    /// Current lifecycle state. Serialized flat as `status` plus its fields.
    #[serde(flatten)]
    pub state: TaskState,

    pub created_at: DateTime<Utc>,
    /// Always `created_at + 24h`; fixed at creation.
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `OPEN` task.
    pub fn open(new: NewTask, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            id: TaskId::new(),
            title: new.title,
            description: new.description,
            project_id: new.project_id,
            state: TaskState::Open,
            created_at: now,
            expires_at: now + lifetime,
            updated_at: now,
        }
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn assigned_to(&self) -> Option<&UserId> {
        match &self.state {
            TaskState::InProgress { assigned_to, .. } | TaskState::Completed { assigned_to, .. } => {
                Some(assigned_to)
            }
            TaskState::Open | TaskState::Expired => None,
        }
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::InProgress { claimed_at, .. } => Some(*claimed_at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::Completed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    /// Is this task held by `user` right now?
    pub fn is_active_for(&self, user: &UserId) -> bool {
        matches!(&self.state, TaskState::InProgress { assigned_to, .. } if assigned_to == user)
    }

    // Each transition below returns the successor record only when the
    // current state matches the edge's predicate. Stores apply the result as
    // a single conditional write.

    /// `OPEN` and unassigned → `IN_PROGRESS` owned by `user`.
    pub fn claimed(&self, user: &UserId, now: DateTime<Utc>) -> Option<Task> {
        match self.state {
            TaskState::Open => Some(self.with_state(
                TaskState::InProgress {
                    assigned_to: user.clone(),
                    claimed_at: now,
                },
                now,
            )),
            _ => None,
        }
    }

    /// `IN_PROGRESS` owned by `user` → `COMPLETED`.
    pub fn completed(&self, user: &UserId, now: DateTime<Utc>) -> Option<Task> {
        match &self.state {
            TaskState::InProgress { assigned_to, .. } if assigned_to == user => Some(
                self.with_state(
                    TaskState::Completed {
                        assigned_to: assigned_to.clone(),
                        completed_at: now,
                    },
                    now,
                ),
            ),
            _ => None,
        }
    }

    /// `OPEN` created at or before `cutoff` → `EXPIRED`.
    pub fn expired(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Option<Task> {
        match self.state {
            TaskState::Open if self.created_at <= cutoff => {
                Some(self.with_state(TaskState::Expired, now))
            }
            _ => None,
        }
    }

    /// `IN_PROGRESS` claimed at or before `cutoff` → `OPEN`, assignee cleared.
    pub fn released(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Option<Task> {
        match self.state {
            TaskState::InProgress { claimed_at, .. } if claimed_at <= cutoff => {
                Some(self.with_state(TaskState::Open, now))
            }
            _ => None,
        }
    }

    fn with_state(&self, state: TaskState, now: DateTime<Utc>) -> Task {
        debug_assert!(self.status().can_transition_to(state.status()));
        Task {
            state,
            updated_at: now,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for creating new tasks.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) project_id: ProjectId,
}

impl NewTask {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            project_id: ProjectId::new(project_id),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}
