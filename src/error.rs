//! Error types for cosmos-tasks.

use std::time::Duration;

use thiserror::Error;

use crate::model::{TaskId, UserId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {0} is already claimed or no longer open")]
    Conflict(TaskId),

    #[error("user {user} already has {active} active tasks (limit {limit})")]
    LimitExceeded {
        user: UserId,
        active: u64,
        limit: u32,
    },

    /// Not found, not in progress, or owned by someone else. The caller
    /// cannot tell which.
    #[error("task {0} cannot be completed by this caller")]
    PreconditionFailed(TaskId),

    #[error("too many claim attempts for {identity}, retry in {}s", retry_after.as_secs())]
    RateLimited {
        identity: String,
        retry_after: Duration,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Caller-facing classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    LimitExceeded,
    PreconditionFailed,
    RateLimited,
    Internal,
}

impl ErrorKind {
    /// Conventional HTTP status for an API layer to map onto.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::LimitExceeded => 429,
            ErrorKind::PreconditionFailed => 412,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Error::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Database(_)
            | Error::Migration(_)
            | Error::Io(_)
            | Error::Config(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }
}
