//! Operation registry: the durable record of every lifecycle operation.
//!
//! Each state change is one conditional `UPDATE ... WHERE state = ?`, so a
//! poller reading concurrently sees either the old row or the new one.

use crate::error::{OrchestratorError, Result};
use crate::operation::{Failure, FailureKind, Operation, OperationFilters, OperationState};
use crate::request::{LifecycleRequest, OperationKind};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

#[derive(Clone)]
pub struct OperationRegistry {
    pool: SqlitePool,
}

impl OperationRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record a new Queued operation for `request`.
    ///
    /// Does not take the resource lock; the dispatcher does both in one
    /// transaction.
    pub async fn create(&self, request: LifecycleRequest) -> Result<Operation> {
        let action = request.action()?;
        let lock_key = request.lock_key(&action);
        let operation = new_queued(Uuid::new_v4().to_string(), request, lock_key);

        Self::insert_with(&self.pool, &operation).await?;
        Ok(operation)
    }

    pub(crate) async fn insert_with<'e, E>(executor: E, operation: &Operation) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let request = serde_json::to_string(&operation.request)?;

        sqlx::query(
            r#"
            INSERT INTO operations (id, pool, resource_uuid, kind, lock_key, request, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.pool)
        .bind(&operation.resource_uuid)
        .bind(operation.kind)
        .bind(&operation.lock_key)
        .bind(request)
        .bind(operation.state)
        .bind(operation.created_at.timestamp_millis())
        .bind(operation.updated_at.timestamp_millis())
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Get a single operation by ID
    pub async fn get(&self, id: &str) -> Result<Operation> {
        sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?
            .try_into()
    }

    /// Move an operation to `new_state`.
    ///
    /// Only Queued→Running, Running→Succeeded and Running→Failed are legal.
    /// `failure` is recorded only on Failed and `result` only on Succeeded.
    #[instrument(skip(self, failure, result), fields(operation_id = %id, to = %new_state))]
    pub async fn transition(
        &self,
        id: &str,
        new_state: OperationState,
        failure: Option<Failure>,
        result: Option<serde_json::Value>,
    ) -> Result<Operation> {
        let Some(expected) = new_state.predecessor() else {
            let current = self.get(id).await?;
            return Err(OrchestratorError::InvalidTransition {
                id: id.to_string(),
                from: current.state,
                to: new_state,
            });
        };

        let now = Utc::now().timestamp_millis();
        let started_at = (new_state == OperationState::Running).then_some(now);
        let finished_at = new_state.is_terminal().then_some(now);
        let (error, failure_kind) = match (new_state, failure) {
            (OperationState::Failed, Some(f)) => (Some(f.message), Some(f.kind)),
            _ => (None, None),
        };
        let result = match (new_state, result) {
            (OperationState::Succeeded, Some(value)) if !value.is_null() => {
                Some(serde_json::to_string(&value)?)
            }
            _ => None,
        };

        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            UPDATE operations
            SET state = ?, updated_at = ?,
                started_at = COALESCE(?, started_at),
                finished_at = COALESCE(?, finished_at),
                error = ?, failure_kind = ?, result = ?
            WHERE id = ? AND state = ?
            RETURNING *
            "#,
        )
        .bind(new_state)
        .bind(now)
        .bind(started_at)
        .bind(finished_at)
        .bind(error)
        .bind(failure_kind)
        .bind(result)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!("Operation transitioned");
                row.try_into()
            }
            None => {
                let current = self.get(id).await?;
                Err(OrchestratorError::InvalidTransition {
                    id: id.to_string(),
                    from: current.state,
                    to: new_state,
                })
            }
        }
    }

    /// Get operations with optional filters, newest first
    pub async fn list(&self, filters: &OperationFilters) -> Result<Vec<Operation>> {
        let mut query = "SELECT * FROM operations WHERE 1=1".to_string();

        if filters.pool.is_some() {
            query.push_str(" AND pool = ?");
        }
        if filters.resource_uuid.is_some() {
            query.push_str(" AND resource_uuid = ?");
        }
        if filters.kind.is_some() {
            query.push_str(" AND kind = ?");
        }
        if filters.state.is_some() {
            query.push_str(" AND state = ?");
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, OperationRow>(&query);

        if let Some(pool) = &filters.pool {
            q = q.bind(pool);
        }
        if let Some(uuid) = &filters.resource_uuid {
            q = q.bind(uuid);
        }
        if let Some(kind) = filters.kind {
            q = q.bind(kind);
        }
        if let Some(state) = filters.state {
            q = q.bind(state);
        }

        let limit = filters
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    /// Running operations whose last update is at or before `cutoff`.
    pub async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations WHERE state = ? AND updated_at <= ? ORDER BY updated_at",
        )
        .bind(OperationState::Running)
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    /// Queued operations in submission order.
    pub async fn queued(&self) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations WHERE state = ? ORDER BY created_at, rowid",
        )
        .bind(OperationState::Queued)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }
}

pub(crate) fn new_queued(id: String, request: LifecycleRequest, lock_key: String) -> Operation {
    let now = Utc::now();
    Operation {
        id,
        pool: request.pool.clone(),
        resource_uuid: request.resource_uuid.clone(),
        kind: request.kind,
        lock_key,
        request,
        state: OperationState::Queued,
        created_at: now,
        updated_at: now,
        started_at: None,
        finished_at: None,
        error: None,
        failure_kind: None,
        result: None,
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    pool: String,
    resource_uuid: String,
    kind: OperationKind,
    lock_key: String,
    request: String,
    state: OperationState,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    error: Option<String>,
    failure_kind: Option<FailureKind>,
    result: Option<String>,
}

impl TryFrom<OperationRow> for Operation {
    type Error = OrchestratorError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            pool: row.pool,
            resource_uuid: row.resource_uuid,
            kind: row.kind,
            lock_key: row.lock_key,
            request: serde_json::from_str(&row.request)?,
            state: row.state,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            started_at: row.started_at.map(from_millis),
            finished_at: row.finished_at.map(from_millis),
            error: row.error,
            failure_kind: row.failure_kind,
            result: row.result.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;
    use serde_json::json;

    fn start_request(uuid: &str) -> LifecycleRequest {
        LifecycleRequest::new("p1", uuid, OperationKind::Start)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = OperationRegistry::new(create_test_db().await);

        let op = registry.create(start_request("u1")).await.unwrap();
        assert_eq!(op.state, OperationState::Queued);
        assert_eq!(op.lock_key, "u1");

        let fetched = registry.get(&op.id).await.unwrap();
        assert_eq!(fetched.id, op.id);
        assert_eq!(fetched.request, op.request);
        assert_eq!(fetched.state, OperationState::Queued);
    }

    #[tokio::test]
    async fn test_get_missing_operation() {
        let registry = OperationRegistry::new(create_test_db().await);

        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_legal_transitions() {
        let registry = OperationRegistry::new(create_test_db().await);
        let op = registry.create(start_request("u1")).await.unwrap();

        let running = registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .unwrap();
        assert_eq!(running.state, OperationState::Running);
        assert!(running.started_at.is_some());

        let done = registry
            .transition(
                &op.id,
                OperationState::Succeeded,
                None,
                Some(json!({ "power_state": "Running" })),
            )
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Succeeded);
        assert!(done.finished_at.is_some());
        assert_eq!(done.result, Some(json!({ "power_state": "Running" })));
        assert_eq!(done.error, None);
    }

    #[tokio::test]
    async fn test_failed_transition_records_failure() {
        let registry = OperationRegistry::new(create_test_db().await);
        let op = registry.create(start_request("u1")).await.unwrap();
        registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .unwrap();

        let failed = registry
            .transition(
                &op.id,
                OperationState::Failed,
                Some(Failure::new(FailureKind::RemoteRejected, "vm running")),
                None,
            )
            .await
            .unwrap();

        assert_eq!(failed.failure_kind, Some(FailureKind::RemoteRejected));
        assert_eq!(failed.error.as_deref(), Some("vm running"));
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_rejected() {
        let registry = OperationRegistry::new(create_test_db().await);
        let op = registry.create(start_request("u1")).await.unwrap();

        // Queued -> Succeeded skips Running
        let err = registry
            .transition(&op.id, OperationState::Succeeded, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: OperationState::Queued,
                to: OperationState::Succeeded,
                ..
            }
        ));

        registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .unwrap();

        // Running -> Running and anything -> Queued
        assert!(registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .is_err());
        assert!(registry
            .transition(&op.id, OperationState::Queued, None, None)
            .await
            .is_err());

        registry
            .transition(&op.id, OperationState::Failed, None, None)
            .await
            .unwrap();

        // Terminal states are final
        let err = registry
            .transition(&op.id, OperationState::Succeeded, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: OperationState::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transition_missing_operation() {
        let registry = OperationRegistry::new(create_test_db().await);

        let err = registry
            .transition("nope", OperationState::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let registry = OperationRegistry::new(create_test_db().await);
        registry.create(start_request("u1")).await.unwrap();
        registry.create(start_request("u2")).await.unwrap();
        registry
            .create(LifecycleRequest::new("p2", "u3", OperationKind::Destroy))
            .await
            .unwrap();

        let all = registry.list(&OperationFilters::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let p1 = registry
            .list(&OperationFilters {
                pool: Some("p1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(p1.len(), 2);

        let destroys = registry
            .list(&OperationFilters {
                kind: Some(OperationKind::Destroy),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(destroys.len(), 1);
        assert_eq!(destroys[0].resource_uuid, "u3");

        let limited = registry
            .list(&OperationFilters {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].resource_uuid, "u3");
    }

    #[tokio::test]
    async fn test_stale_running() {
        let registry = OperationRegistry::new(create_test_db().await);
        let op = registry.create(start_request("u1")).await.unwrap();
        registry.create(start_request("u2")).await.unwrap();
        registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .unwrap();

        let none = registry
            .stale_running(Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(none.is_empty());

        let stale = registry
            .stale_running(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, op.id);

        let queued = registry.queued().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].resource_uuid, "u2");
    }
}
