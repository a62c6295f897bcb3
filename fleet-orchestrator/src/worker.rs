//! Per-pool worker lanes.
//!
//! Every configured pool gets an unbounded FIFO queue and one runner task.
//! The runner holds a semaphore permit for each operation it spawns, so at
//! most `concurrency` hypervisor calls are in flight per pool.

use crate::config::FleetConfig;
use crate::error::{OrchestratorError, Result};
use crate::locks::ResourceLocks;
use crate::operation::{Failure, FailureKind, Operation, OperationState};
use crate::registry::OperationRegistry;
use crate::request::Action;
use fleet_hypervisor::HypervisorClient;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

/// Snapshot of one pool's worker lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PoolStats {
    pub name: String,
    pub concurrency: usize,
    /// Operations waiting for a permit.
    pub queued: usize,
    /// Operations currently executing.
    pub running: usize,
}

struct Lane {
    sender: mpsc::UnboundedSender<Operation>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    queued: Arc<AtomicUsize>,
}

pub struct WorkerPool {
    lanes: RwLock<HashMap<String, Lane>>,
}

impl WorkerPool {
    /// Spawn one runner per configured pool. Must be called inside a tokio
    /// runtime.
    pub fn start(config: &FleetConfig, executor: Executor) -> Arc<Self> {
        let mut lanes = HashMap::new();

        for name in config.pool_names() {
            let concurrency = config.concurrency_for(name);
            let (sender, receiver) = mpsc::unbounded_channel();
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let queued = Arc::new(AtomicUsize::new(0));

            tokio::spawn(run_lane(
                name.to_string(),
                receiver,
                semaphore.clone(),
                queued.clone(),
                executor.clone(),
            ));

            info!(pool = %name, concurrency, "Worker lane started");
            lanes.insert(
                name.to_string(),
                Lane {
                    sender,
                    semaphore,
                    concurrency,
                    queued,
                },
            );
        }

        Arc::new(Self {
            lanes: RwLock::new(lanes),
        })
    }

    /// Put a Queued operation on its pool's queue.
    pub fn enqueue(&self, operation: Operation) -> Result<()> {
        let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(lane) = lanes.get(&operation.pool) else {
            return Err(OrchestratorError::PoolUnavailable(operation.pool));
        };

        lane.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(operation)) = lane.sender.send(operation) {
            lane.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::PoolUnavailable(operation.pool));
        }
        Ok(())
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<PoolStats> = lanes
            .iter()
            .map(|(name, lane)| PoolStats {
                name: name.clone(),
                concurrency: lane.concurrency,
                queued: lane.queued.load(Ordering::SeqCst),
                running: lane
                    .concurrency
                    .saturating_sub(lane.semaphore.available_permits()),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Stop accepting work. Runners finish what is already queued only while
    /// the runtime stays up; anything left Queued is resumed on the next start.
    pub fn shutdown(&self) {
        let mut lanes = self.lanes.write().unwrap_or_else(PoisonError::into_inner);
        let count = lanes.len();
        lanes.clear();
        info!(lanes = count, "Worker lanes closed");
    }
}

async fn run_lane(
    pool: String,
    mut receiver: mpsc::UnboundedReceiver<Operation>,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    executor: Executor,
) {
    while let Some(operation) = receiver.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        let executor = executor.clone();
        tokio::spawn(async move {
            executor.execute(operation).await;
            drop(permit);
        });
    }
    debug!(pool = %pool, "Worker lane drained");
}

/// Runs single operations against the hypervisor and records the outcome.
#[derive(Clone)]
pub struct Executor {
    registry: OperationRegistry,
    locks: ResourceLocks,
    hypervisor: Arc<dyn HypervisorClient>,
    timeout: Duration,
}

impl Executor {
    pub fn new(
        registry: OperationRegistry,
        locks: ResourceLocks,
        hypervisor: Arc<dyn HypervisorClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            locks,
            hypervisor,
            timeout,
        }
    }

    /// Execute one Queued operation to completion. The operation's lock is
    /// released once a terminal state is recorded for it. An operation this
    /// executor never moved to Running keeps its lock.
    #[instrument(skip(self, operation), fields(operation_id = %operation.id, pool = %operation.pool, kind = %operation.kind))]
    pub async fn execute(&self, operation: Operation) {
        match self
            .registry
            .transition(&operation.id, OperationState::Running, None, None)
            .await
        {
            Ok(_) => {}
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                warn!(%from, "Operation is not queued, skipping");
                return;
            }
            Err(e) => {
                // Still Queued and locked; resumed on the next start.
                error!(error = %e, "Operation could not start, skipping");
                return;
            }
        }

        let outcome = match operation.request.action() {
            Ok(action) => self.run(&operation, action).await,
            Err(e) => Err(Failure::interrupted(format!("stored request is invalid: {e}"))),
        };

        let recorded = match outcome {
            Ok(result) => {
                self.registry
                    .transition(&operation.id, OperationState::Succeeded, None, result)
                    .await
            }
            Err(failure) => {
                self.registry
                    .transition(&operation.id, OperationState::Failed, Some(failure), None)
                    .await
            }
        };

        let finalized = match recorded {
            Ok(op) => {
                match op.failure_kind {
                    None => info!("Operation succeeded"),
                    Some(kind) => warn!(
                        failure_kind = ?kind,
                        error = op.error.as_deref().unwrap_or_default(),
                        "Operation failed"
                    ),
                }
                true
            }
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                warn!(%from, "Operation already finalized, discarding result");
                from.is_terminal()
            }
            Err(e) => {
                error!(error = %e, "Failed to record operation outcome");
                self.confirm_terminal(&operation.id).await
            }
        };

        // A Running operation keeps its lock until the stale sweep fails it.
        if finalized {
            self.release(&operation).await;
        }
    }

    async fn confirm_terminal(&self, id: &str) -> bool {
        match self.registry.get(id).await {
            Ok(current) => current.is_terminal(),
            Err(e) => {
                error!(error = %e, "Failed to re-read operation state");
                false
            }
        }
    }

    async fn run(
        &self,
        operation: &Operation,
        action: Action,
    ) -> std::result::Result<Option<Value>, Failure> {
        let mut handle = tokio::spawn(perform(
            self.hypervisor.clone(),
            operation.pool.clone(),
            operation.resource_uuid.clone(),
            action,
        ));

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(Failure::from(e)),
            Ok(Err(join_error)) => Err(Failure::interrupted(format!(
                "hypervisor call aborted: {join_error}"
            ))),
            Err(_) => {
                // Advisory: the remote side may still complete the action.
                handle.abort();
                Err(Failure::new(
                    FailureKind::Timeout,
                    format!(
                        "hypervisor call did not finish within {}s",
                        self.timeout.as_secs()
                    ),
                ))
            }
        }
    }

    async fn release(&self, operation: &Operation) {
        if let Err(e) = self
            .locks
            .release(&operation.pool, &operation.lock_key, &operation.id)
            .await
        {
            error!(error = %e, lock_key = %operation.lock_key, "Failed to release resource lock");
        }
    }
}

async fn perform(
    hypervisor: Arc<dyn HypervisorClient>,
    pool: String,
    uuid: String,
    action: Action,
) -> fleet_hypervisor::Result<Option<Value>> {
    match action {
        Action::Power(power) => {
            let state = hypervisor.power_action(&pool, &uuid, power).await?;
            Ok(Some(json!({ "power_state": state })))
        }
        Action::Destroy => {
            hypervisor.destroy_vm(&pool, &uuid).await?;
            Ok(None)
        }
        Action::Deploy(spec) => {
            let created = hypervisor.deploy_vm(&pool, &spec).await?;
            Ok(Some(json!({ "uuid": created })))
        }
        Action::UpdateVm(update) => {
            hypervisor.update_vm(&pool, &uuid, &update).await?;
            Ok(None)
        }
        Action::CreateNetwork(spec) => {
            let created = hypervisor.create_network(&pool, &spec).await?;
            Ok(Some(json!({ "uuid": created })))
        }
        Action::UpdateNetwork(update) => {
            hypervisor.update_network(&pool, &uuid, &update).await?;
            Ok(None)
        }
    }
}
