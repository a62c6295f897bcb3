//! Per-resource locks.
//!
//! A lock row exists for exactly as long as its operation is live. Acquire
//! is a single upsert, so two submitters racing on the same key cannot both
//! see themselves as the holder.

use crate::error::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

/// Outcome of a lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    Held { operation_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
pub struct ResourceLock {
    pub pool: String,
    pub resource_key: String,
    pub operation_id: String,
    /// Unix milliseconds.
    pub acquired_at: i64,
}

#[derive(Clone)]
pub struct ResourceLocks {
    pool: SqlitePool,
}

impl ResourceLocks {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Try to take the lock on `(pool, key)` for `operation_id`.
    ///
    /// Returns false if another operation holds it.
    pub async fn acquire(&self, pool: &str, key: &str, operation_id: &str) -> Result<bool> {
        let attempt = Self::try_acquire_with(&self.pool, pool, key, operation_id).await?;
        Ok(attempt == LockAttempt::Acquired)
    }

    pub(crate) async fn try_acquire_with<'e, E>(
        executor: E,
        pool: &str,
        key: &str,
        operation_id: &str,
    ) -> Result<LockAttempt>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        // The no-op update makes RETURNING yield the current holder on conflict.
        let (holder,): (String,) = sqlx::query_as(
            r#"
            INSERT INTO resource_locks (pool, resource_key, operation_id, acquired_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(pool, resource_key) DO UPDATE SET operation_id = operation_id
            RETURNING operation_id
            "#,
        )
        .bind(pool)
        .bind(key)
        .bind(operation_id)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(executor)
        .await?;

        if holder == operation_id {
            Ok(LockAttempt::Acquired)
        } else {
            Ok(LockAttempt::Held {
                operation_id: holder,
            })
        }
    }

    /// Release the lock if `operation_id` still holds it. Releasing a lock
    /// that is gone or held by someone else is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, pool: &str, key: &str, operation_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM resource_locks WHERE pool = ? AND resource_key = ? AND operation_id = ?",
        )
        .bind(pool)
        .bind(key)
        .bind(operation_id)
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected() > 0;
        if released {
            debug!("Lock released");
        }
        Ok(released)
    }

    /// Current holder of `(pool, key)`, if any.
    pub async fn holder(&self, pool: &str, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT operation_id FROM resource_locks WHERE pool = ? AND resource_key = ?",
        )
        .bind(pool)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    pub async fn list(&self) -> Result<Vec<ResourceLock>> {
        let locks = sqlx::query_as::<_, ResourceLock>(
            "SELECT pool, resource_key, operation_id, acquired_at FROM resource_locks ORDER BY acquired_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(locks)
    }

    /// Delete locks whose operation is missing or no longer live.
    pub async fn release_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM resource_locks
            WHERE operation_id NOT IN (
                SELECT id FROM operations WHERE state IN ('queued', 'running')
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            warn!(purged, "Released orphaned resource locks");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let locks = ResourceLocks::new(create_test_db().await);

        assert!(locks.acquire("p1", "u1", "op-1").await.unwrap());
        assert!(!locks.acquire("p1", "u1", "op-2").await.unwrap());
        assert_eq!(
            locks.holder("p1", "u1").await.unwrap().as_deref(),
            Some("op-1")
        );

        // Same key in another pool is a different resource
        assert!(locks.acquire("p2", "u1", "op-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_held_attempt_names_holder() {
        let db = create_test_db().await;
        let locks = ResourceLocks::new(db.clone());
        locks.acquire("p1", "u1", "op-1").await.unwrap();

        let attempt = ResourceLocks::try_acquire_with(&db, "p1", "u1", "op-2")
            .await
            .unwrap();
        assert_eq!(
            attempt,
            LockAttempt::Held {
                operation_id: "op-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let locks = ResourceLocks::new(create_test_db().await);
        locks.acquire("p1", "u1", "op-1").await.unwrap();

        assert!(locks.release("p1", "u1", "op-1").await.unwrap());
        assert!(!locks.release("p1", "u1", "op-1").await.unwrap());
        assert_eq!(locks.holder("p1", "u1").await.unwrap(), None);

        assert!(locks.acquire("p1", "u1", "op-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_holder_keeps_lock() {
        let locks = ResourceLocks::new(create_test_db().await);
        locks.acquire("p1", "u1", "op-1").await.unwrap();

        assert!(!locks.release("p1", "u1", "op-2").await.unwrap());
        assert_eq!(
            locks.holder("p1", "u1").await.unwrap().as_deref(),
            Some("op-1")
        );
    }

    #[tokio::test]
    async fn test_release_orphaned_drops_locks_without_live_operation() {
        let locks = ResourceLocks::new(create_test_db().await);
        locks.acquire("p1", "u1", "ghost").await.unwrap();

        assert_eq!(locks.release_orphaned().await.unwrap(), 1);
        assert!(locks.list().await.unwrap().is_empty());
    }
}
