//! Core data model.
//!
//! A task is a unit of work that one user at a time may hold. Its status and
//! the fields that only make sense in some statuses (assignee, claim time,
//! completion time) travel together in [`TaskState`], so a task can never be
//! `OPEN` with an owner or `IN_PROGRESS` without one.

pub mod audit;
pub mod identity;
pub mod task;

pub use audit::{AuditAction, AuditActor, AuditLogEntry};
pub use identity::{Actor, Role, UserId};
pub use task::{NewTask, ProjectId, Status, Task, TaskId, TaskState};
