//! Recovery of operations a dead or stuck worker left behind.

use crate::error::{OrchestratorError, Result};
use crate::locks::ResourceLocks;
use crate::operation::{Failure, Operation, OperationState};
use crate::registry::OperationRegistry;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RecoveryReport {
    /// Operations failed as interrupted.
    pub interrupted: Vec<String>,
    /// Locks deleted because their operation was no longer live.
    pub orphaned_locks: u64,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.interrupted.is_empty() && self.orphaned_locks == 0
    }
}

#[derive(Clone)]
pub struct RecoverySweep {
    registry: OperationRegistry,
    locks: ResourceLocks,
}

impl RecoverySweep {
    pub fn new(registry: OperationRegistry, locks: ResourceLocks) -> Self {
        Self { registry, locks }
    }

    /// Fail every operation that has been Running for at least `stale_after`
    /// and free its lock, then drop locks whose operation is not live.
    #[instrument(skip(self))]
    pub async fn sweep(&self, stale_after: Duration) -> Result<RecoveryReport> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| OrchestratorError::Config(format!("invalid stale threshold: {e}")))?;
        let cutoff = Utc::now() - stale_after;

        let mut report = RecoveryReport::default();
        for operation in self.registry.stale_running(cutoff).await? {
            let failure = Failure::interrupted(format!(
                "operation was still running after {}s",
                stale_after.num_seconds()
            ));
            match self
                .registry
                .transition(&operation.id, OperationState::Failed, Some(failure), None)
                .await
            {
                Ok(_) => {}
                // Finished between the select and the update
                Err(OrchestratorError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }

            self.locks
                .release(&operation.pool, &operation.lock_key, &operation.id)
                .await?;
            warn!(operation_id = %operation.id, pool = %operation.pool, "Interrupted stale operation");
            report.interrupted.push(operation.id);
        }

        report.orphaned_locks = self.locks.release_orphaned().await?;

        if !report.is_empty() {
            info!(
                interrupted = report.interrupted.len(),
                orphaned_locks = report.orphaned_locks,
                "Recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Fail a Queued operation that will never be picked up and free its lock.
    pub async fn abandon(&self, operation: &Operation, reason: &str) -> Result<()> {
        abandon(&self.registry, &self.locks, operation, reason).await
    }
}

pub(crate) async fn abandon(
    registry: &OperationRegistry,
    locks: &ResourceLocks,
    operation: &Operation,
    reason: &str,
) -> Result<()> {
    let outcome = async {
        registry
            .transition(&operation.id, OperationState::Running, None, None)
            .await?;
        registry
            .transition(
                &operation.id,
                OperationState::Failed,
                Some(Failure::interrupted(reason)),
                None,
            )
            .await
    }
    .await;

    match outcome {
        Ok(_) | Err(OrchestratorError::InvalidTransition { .. }) => {}
        Err(e) => return Err(e),
    }

    locks
        .release(&operation.pool, &operation.lock_key, &operation.id)
        .await?;
    warn!(operation_id = %operation.id, pool = %operation.pool, reason, "Abandoned queued operation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::FailureKind;
    use crate::request::{LifecycleRequest, OperationKind};
    use crate::test_utils::create_test_db;

    async fn setup() -> (OperationRegistry, ResourceLocks, RecoverySweep) {
        let db = create_test_db().await;
        let registry = OperationRegistry::new(db.clone());
        let locks = ResourceLocks::new(db);
        let sweep = RecoverySweep::new(registry.clone(), locks.clone());
        (registry, locks, sweep)
    }

    async fn running(registry: &OperationRegistry, locks: &ResourceLocks, uuid: &str) -> Operation {
        let op = registry
            .create(LifecycleRequest::new("p1", uuid, OperationKind::Stop))
            .await
            .unwrap();
        locks.acquire("p1", uuid, &op.id).await.unwrap();
        registry
            .transition(&op.id, OperationState::Running, None, None)
            .await
            .unwrap()
    }

    async fn backdate(registry: &OperationRegistry, id: &str, by: chrono::Duration) {
        sqlx::query("UPDATE operations SET updated_at = ? WHERE id = ?")
            .bind((Utc::now() - by).timestamp_millis())
            .bind(id)
            .execute(registry.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_interrupts_only_stale_operations() {
        let (registry, locks, sweep) = setup().await;
        let stale = running(&registry, &locks, "u1").await;
        let fresh = running(&registry, &locks, "u2").await;
        backdate(&registry, &stale.id, chrono::Duration::minutes(20)).await;

        let report = sweep.sweep(Duration::from_secs(600)).await.unwrap();

        assert_eq!(report.interrupted, vec![stale.id.clone()]);
        let swept = registry.get(&stale.id).await.unwrap();
        assert_eq!(swept.state, OperationState::Failed);
        assert_eq!(swept.failure_kind, Some(FailureKind::Interrupted));
        assert_eq!(locks.holder("p1", "u1").await.unwrap(), None);

        assert_eq!(
            registry.get(&fresh.id).await.unwrap().state,
            OperationState::Running
        );
        assert_eq!(
            locks.holder("p1", "u2").await.unwrap().as_deref(),
            Some(fresh.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_sweep_purges_orphaned_locks() {
        let (_registry, locks, sweep) = setup().await;
        locks.acquire("p1", "u9", "gone").await.unwrap();

        let report = sweep.sweep(Duration::from_secs(600)).await.unwrap();

        assert!(report.interrupted.is_empty());
        assert_eq!(report.orphaned_locks, 1);
    }

    #[tokio::test]
    async fn test_abandon_fails_queued_operation() {
        let (registry, locks, sweep) = setup().await;
        let op = registry
            .create(LifecycleRequest::new("p1", "u1", OperationKind::Start))
            .await
            .unwrap();
        locks.acquire("p1", "u1", &op.id).await.unwrap();

        sweep.abandon(&op, "pool removed").await.unwrap();

        let failed = registry.get(&op.id).await.unwrap();
        assert_eq!(failed.state, OperationState::Failed);
        assert_eq!(failed.error.as_deref(), Some("pool removed"));
        assert!(locks.list().await.unwrap().is_empty());
    }
}
