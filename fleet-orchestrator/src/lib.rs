//! Lifecycle operation orchestration for hypervisor pools
//!
//! This crate accepts VM and network lifecycle requests, runs them on
//! per-pool worker lanes against a [`fleet_hypervisor::HypervisorClient`], and
//! keeps a durable SQLite record of every operation. At most one operation is
//! in flight per resource. It is consumed by the fleet-api HTTP service but
//! can be embedded by any other entry point through [`Fleet`].

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod locks;
pub mod operation;
pub mod recovery;
pub mod registry;
pub mod request;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{FleetConfig, PoolConfig};
pub use dispatcher::Dispatcher;
pub use error::{OrchestratorError, Result};
pub use fleet::Fleet;
pub use locks::{ResourceLock, ResourceLocks};
pub use operation::{Failure, FailureKind, Operation, OperationFilters, OperationState};
pub use recovery::{RecoveryReport, RecoverySweep};
pub use registry::OperationRegistry;
pub use request::{Action, LifecycleRequest, OperationKind};
pub use worker::{Executor, PoolStats, WorkerPool};
