use crate::config::FleetConfig;
use crate::error::{OrchestratorError, Result};
use crate::locks::{LockAttempt, ResourceLocks};
use crate::operation::Operation;
use crate::recovery;
use crate::registry::{self, OperationRegistry};
use crate::request::LifecycleRequest;
use crate::worker::WorkerPool;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Accepts lifecycle requests and hands them to the worker lanes.
///
/// `submit` never waits on the hypervisor: it validates, takes the resource
/// lock, records the Queued operation and returns.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<FleetConfig>,
    db: SqlitePool,
    registry: OperationRegistry,
    locks: ResourceLocks,
    workers: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<FleetConfig>,
        db: SqlitePool,
        registry: OperationRegistry,
        locks: ResourceLocks,
        workers: Arc<WorkerPool>,
    ) -> Self {
        Self {
            config,
            db,
            registry,
            locks,
            workers,
        }
    }

    #[instrument(skip(self, request), fields(pool = %request.pool, resource_uuid = %request.resource_uuid, kind = %request.kind))]
    pub async fn submit(&self, request: LifecycleRequest) -> Result<Operation> {
        let action = request.validate(&self.config)?;
        let lock_key = request.lock_key(&action);
        let operation = registry::new_queued(Uuid::new_v4().to_string(), request, lock_key);

        // Lock and record commit together, so a lock never outlives a
        // missing operation row.
        let mut tx = self.db.begin().await?;
        match ResourceLocks::try_acquire_with(
            &mut *tx,
            &operation.pool,
            &operation.lock_key,
            &operation.id,
        )
        .await?
        {
            LockAttempt::Acquired => {}
            LockAttempt::Held { operation_id } => {
                tx.rollback().await?;
                info!(existing_operation_id = %operation_id, "Resource busy");
                return Err(OrchestratorError::ResourceBusy {
                    existing_operation_id: operation_id,
                });
            }
        }
        OperationRegistry::insert_with(&mut *tx, &operation).await?;
        tx.commit().await?;

        if let Err(e) = self.workers.enqueue(operation.clone()) {
            warn!(operation_id = %operation.id, error = %e, "Could not enqueue operation");
            recovery::abandon(
                &self.registry,
                &self.locks,
                &operation,
                "worker pool is shut down",
            )
            .await?;
            return Err(e);
        }

        info!(operation_id = %operation.id, "Operation queued");
        Ok(operation)
    }
}
