//! The fleet handle front ends hold.

use crate::config::FleetConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{OrchestratorError, Result};
use crate::locks::{ResourceLock, ResourceLocks};
use crate::operation::{Operation, OperationFilters};
use crate::recovery::{RecoveryReport, RecoverySweep};
use crate::registry::OperationRegistry;
use crate::request::LifecycleRequest;
use crate::worker::{Executor, PoolStats, WorkerPool};
use fleet_hypervisor::{
    HostSummary, HypervisorClient, NetworkDetails, NetworkSummary, TemplateSummary, VmDetails,
    VmSummary,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument};

/// Dispatcher, worker lanes, registry, locks and recovery wired together
/// over one database and one hypervisor client. Cheap to clone.
#[derive(Clone)]
pub struct Fleet {
    config: Arc<FleetConfig>,
    db: SqlitePool,
    registry: OperationRegistry,
    locks: ResourceLocks,
    dispatcher: Dispatcher,
    workers: Arc<WorkerPool>,
    recovery: RecoverySweep,
    hypervisor: Arc<dyn HypervisorClient>,
}

impl Fleet {
    /// Start the fleet over a migrated database.
    ///
    /// Sweeps operations a previous process left Running, starts one worker
    /// lane per configured pool and re-enqueues leftover Queued operations.
    #[instrument(skip_all, fields(pools = config.pools.len(), backend = hypervisor.name()))]
    pub async fn start(
        config: FleetConfig,
        db: SqlitePool,
        hypervisor: Arc<dyn HypervisorClient>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let registry = OperationRegistry::new(db.clone());
        let locks = ResourceLocks::new(db.clone());
        let recovery = RecoverySweep::new(registry.clone(), locks.clone());

        recovery.sweep(config.stale_after()).await?;

        let executor = Executor::new(
            registry.clone(),
            locks.clone(),
            hypervisor.clone(),
            config.operation_timeout(),
        );
        let workers = WorkerPool::start(&config, executor);
        let dispatcher = Dispatcher::new(
            config.clone(),
            db.clone(),
            registry.clone(),
            locks.clone(),
            workers.clone(),
        );

        let fleet = Self {
            config,
            db,
            registry,
            locks,
            dispatcher,
            workers,
            recovery,
            hypervisor,
        };

        let resumed = fleet.resume_queued().await?;
        info!(resumed, "Fleet started");
        Ok(fleet)
    }

    /// Re-enqueue Queued operations from a previous run. Their locks are
    /// still held. Operations for pools no longer configured are abandoned.
    async fn resume_queued(&self) -> Result<usize> {
        let mut resumed = 0;
        for operation in self.registry.queued().await? {
            if !self.config.has_pool(&operation.pool) {
                self.recovery
                    .abandon(&operation, "pool is no longer configured")
                    .await?;
                continue;
            }
            match self.workers.enqueue(operation.clone()) {
                Ok(()) => resumed += 1,
                Err(_) => {
                    self.recovery
                        .abandon(&operation, "worker pool is shut down")
                        .await?
                }
            }
        }
        Ok(resumed)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn submit(&self, request: LifecycleRequest) -> Result<Operation> {
        self.dispatcher.submit(request).await
    }

    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        self.registry.get(id).await
    }

    pub async fn list_operations(&self, filters: &OperationFilters) -> Result<Vec<Operation>> {
        self.registry.list(filters).await
    }

    pub async fn list_locks(&self) -> Result<Vec<ResourceLock>> {
        self.locks.list().await
    }

    /// Run one recovery sweep with the configured staleness threshold.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recovery.sweep(self.config.stale_after()).await
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.workers.stats()
    }

    /// Stop accepting new operations. Work still Queued when the process exits
    /// is resumed by the next [`Fleet::start`]; work left Running is failed as
    /// interrupted by its recovery sweep.
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn hypervisor(&self) -> &Arc<dyn HypervisorClient> {
        &self.hypervisor
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    fn ensure_pool(&self, pool: &str) -> Result<()> {
        if self.config.has_pool(pool) {
            Ok(())
        } else {
            Err(OrchestratorError::UnknownPool(pool.to_string()))
        }
    }

    pub async fn list_hosts(&self, pool: &str) -> Result<Vec<HostSummary>> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.list_hosts(pool).await?)
    }

    pub async fn list_vms(&self, pool: &str) -> Result<Vec<VmSummary>> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.list_vms(pool).await?)
    }

    pub async fn get_vm_details(&self, pool: &str, uuid: &str) -> Result<VmDetails> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.get_vm_details(pool, uuid).await?)
    }

    pub async fn list_networks(&self, pool: &str) -> Result<Vec<NetworkSummary>> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.list_networks(pool).await?)
    }

    pub async fn get_network_details(&self, pool: &str, uuid: &str) -> Result<NetworkDetails> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.get_network_details(pool, uuid).await?)
    }

    pub async fn list_templates(&self, pool: &str) -> Result<Vec<TemplateSummary>> {
        self.ensure_pool(pool)?;
        Ok(self.hypervisor.list_templates(pool).await?)
    }
}
