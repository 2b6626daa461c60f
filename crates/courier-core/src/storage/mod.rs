//! Postgres persistence for webhooks and their delivery attempts.
//!
//! One repository per table. Repositories translate between domain models
//! and rows; all SQL lives in this module. Operations that must be atomic
//! (completing an attempt and enqueueing its successor, claiming a batch)
//! run inside a single statement or transaction here rather than in callers.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

pub mod schema;
pub mod webhook_attempts;
pub mod webhooks;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for webhook subscriptions.
    pub webhooks: Arc<webhooks::Repository>,

    /// Repository for delivery attempts.
    pub webhook_attempts: Arc<webhook_attempts::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            webhooks: Arc::new(webhooks::Repository::new(pool.clone())),
            webhook_attempts: Arc::new(webhook_attempts::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;

        Ok(())
    }

    /// Creates tables and indexes that do not exist yet.
    ///
    /// Every statement is idempotent, so this runs on each startup.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first statement that failed.
    pub async fn run_migrations(&self) -> Result<()> {
        for (name, statement) in schema::STATEMENTS {
            sqlx::query(statement).execute(&*self.pool).await.map_err(|e| {
                crate::CoreError::Database(format!("migration {name} failed: {e}"))
            })?;
            debug!(migration = name, "schema statement applied");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created_lazily() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://localhost/courier_test")
            .expect("lazy pool should not connect");
        let storage = Storage::new(pool);

        assert!(Arc::ptr_eq(&storage.pool(), &storage.webhooks.pool()));
    }
}
