use crate::operation::OperationState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource busy: operation {existing_operation_id} is in progress")]
    ResourceBusy { existing_operation_id: String },

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Unknown pool: {0}")]
    UnknownPool(String),

    #[error("Invalid transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: OperationState,
        to: OperationState,
    },

    #[error("Worker pool for {0} is not accepting operations")]
    PoolUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hypervisor error: {0}")]
    Hypervisor(#[from] fleet_hypervisor::HypervisorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml_ng::Error> for OrchestratorError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}
