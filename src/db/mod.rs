//! Postgres connection pool, migrations, and health check.
//!
//! [`Db`] implements [`TaskStore`](crate::store::TaskStore),
//! [`ProjectCatalog`](crate::store::ProjectCatalog) and
//! [`AuditSink`](crate::audit::AuditSink) on one shared pool.

pub mod audit;
pub mod task;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Register a project row. Project management lives elsewhere; this
    /// exists for seeding and tests.
    pub async fn upsert_project(&self, id: &str, name: &str, created_by: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, created_by) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(id)
        .bind(name)
        .bind(created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
