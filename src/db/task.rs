//! Task persistence on Postgres.
//!
//! Each transition is one `UPDATE ... WHERE <predicate> RETURNING`, so the
//! rows reported back are exactly the rows the statement changed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{ProjectId, Status, Task, TaskId, TaskState, UserId};
use crate::store::{ClaimOutcome, ProjectCatalog, ReleasedClaim, TaskFilter, TaskStore};

macro_rules! task_columns {
    () => {
        "id, title, description, project_id, status, assigned_to, claimed_at, completed_at, created_at, expires_at, updated_at"
    };
}

#[async_trait]
impl TaskStore for Db {
    async fn insert(&self, task: &Task) -> Result<()> {
        sqlx::query(concat!(
            "INSERT INTO tasks (",
            task_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(task.id.0)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.project_id.as_str())
        .bind(task.status().as_str())
        .bind(task.assigned_to().map(UserId::as_str))
        .bind(task.claimed_at())
        .bind(task.completed_at())
        .bind(task.created_at)
        .bind(task.expires_at)
        .bind(task.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(concat!("SELECT ", task_columns!(), " FROM tasks WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn list(&self, filter: &TaskFilter, offset: u64, limit: u64) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(concat!(
            "SELECT ",
            task_columns!(),
            " FROM tasks
             WHERE ($1::text IS NULL OR status = $1)
             AND ($2::text IS NULL OR assigned_to = $2)
             AND ($3::timestamptz IS NULL OR created_at >= $3)
             AND ($4::timestamptz IS NULL OR created_at <= $4)
             ORDER BY created_at ASC, id ASC
             OFFSET $5 LIMIT $6"
        ))
        .bind(filter.status.map(Status::as_str))
        .bind(filter.assigned_to.as_ref().map(UserId::as_str))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM tasks
             WHERE ($1::text IS NULL OR status = $1)
             AND ($2::text IS NULL OR assigned_to = $2)
             AND ($3::timestamptz IS NULL OR created_at >= $3)
             AND ($4::timestamptz IS NULL OR created_at <= $4)",
        )
        .bind(filter.status.map(Status::as_str))
        .bind(filter.assigned_to.as_ref().map(UserId::as_str))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_one(self.pool())
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn claim(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
        max_active: u32,
    ) -> Result<ClaimOutcome> {
        let mut tx = self.pool().begin().await?;

        // Serializes claims per user for the rest of the transaction, so the
        // count below cannot be invalidated by a concurrent claim from the
        // same user before we commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;

        let (active,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM tasks WHERE assigned_to = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(user.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if active >= i64::from(max_active) {
            tx.rollback().await?;
            return Ok(ClaimOutcome::AtCapacity {
                active: active as u64,
            });
        }

        let row: Option<TaskRow> = sqlx::query_as(concat!(
            "UPDATE tasks SET status = 'IN_PROGRESS', assigned_to = $2, claimed_at = $3, updated_at = $3
             WHERE id = $1 AND status = 'OPEN' AND assigned_to IS NULL
             RETURNING ",
            task_columns!()
        ))
        .bind(id.0)
        .bind(user.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(row.try_into_task()?)),
            None => Ok(ClaimOutcome::Unmatched),
        }
    }

    async fn complete(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(concat!(
            "UPDATE tasks SET status = 'COMPLETED', completed_at = $3, claimed_at = NULL, updated_at = $3
             WHERE id = $1 AND status = 'IN_PROGRESS' AND assigned_to = $2
             RETURNING ",
            task_columns!()
        ))
        .bind(id.0)
        .bind(user.as_str())
        .bind(now)
        .fetch_optional(self.pool())
        .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn expire_open(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE tasks SET status = 'EXPIRED', updated_at = $2
             WHERE status = 'OPEN' AND created_at <= $1
             RETURNING id",
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedClaim>> {
        // The CTE captures the owner before the UPDATE clears it. Rows locked
        // by an in-flight complete are skipped and picked up next tick.
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "WITH stale AS (
                SELECT id, assigned_to FROM tasks
                WHERE status = 'IN_PROGRESS' AND claimed_at <= $1
                FOR UPDATE SKIP LOCKED
             )
             UPDATE tasks t
             SET status = 'OPEN', assigned_to = NULL, claimed_at = NULL, updated_at = $2
             FROM stale
             WHERE t.id = stale.id AND t.status = 'IN_PROGRESS'
             RETURNING t.id, stale.assigned_to",
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, owner)| ReleasedClaim {
                id: TaskId(id),
                previous_owner: UserId(owner),
            })
            .collect())
    }
}

#[async_trait]
impl ProjectCatalog for Db {
    async fn project_exists(&self, id: &ProjectId) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1)")
                .bind(id.as_str())
                .fetch_one(self.pool())
                .await?;
        Ok(exists)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    project_id: String,
    status: String,
    assigned_to: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        let status: Status = self.status.parse()?;
        let state = TaskState::from_parts(
            status,
            self.assigned_to.map(UserId),
            self.claimed_at,
            self.completed_at,
        )
        .ok_or_else(|| {
            Error::Other(format!(
                "task {} has columns inconsistent with status {status}",
                self.id
            ))
        })?;

        Ok(Task {
            id: TaskId(self.id),
            title: self.title,
            description: self.description,
            project_id: ProjectId(self.project_id),
            state,
            created_at: self.created_at,
            expires_at: self.expires_at,
            updated_at: self.updated_at,
        })
    }
}
