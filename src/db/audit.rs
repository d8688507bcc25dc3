//! Audit log persistence on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::audit::AuditSink;
use crate::error::Result;
use crate::model::{AuditActor, AuditLogEntry};

#[async_trait]
impl AuditSink for Db {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let (user_id, user_email, user_role) = entry.actor.columns();
        sqlx::query(
            "INSERT INTO audit_logs (id, action, user_id, user_email, user_role, resource_type, resource_id, details, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(entry.action.as_str())
        .bind(user_id)
        .bind(user_email)
        .bind(user_role)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.timestamp)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn entries_for(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, action, user_id, user_email, user_role, resource_type, resource_id, details, timestamp
             FROM audit_logs WHERE resource_id = $1
             ORDER BY timestamp ASC",
        )
        .bind(resource_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(AuditRow::try_into_entry).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    user_id: String,
    user_email: String,
    user_role: String,
    resource_type: String,
    resource_id: String,
    details: String,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn try_into_entry(self) -> Result<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id,
            action: self.action.parse()?,
            actor: AuditActor::from_columns(self.user_id, self.user_email, &self.user_role)?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            details: self.details,
            timestamp: self.timestamp,
        })
    }
}
