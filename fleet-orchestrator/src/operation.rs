use crate::request::{LifecycleRequest, OperationKind};
use chrono::{DateTime, Utc};
use fleet_hypervisor::HypervisorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Operation {
    pub id: String,
    pub pool: String,
    pub resource_uuid: String,
    pub kind: OperationKind,
    /// Key of the resource lock this operation holds while live.
    pub lock_key: String,
    pub request: LifecycleRequest,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }

    /// The only state `self` may be entered from, or `None` for the
    /// initial state.
    pub fn predecessor(&self) -> Option<OperationState> {
        match self {
            OperationState::Queued => None,
            OperationState::Running => Some(OperationState::Queued),
            OperationState::Succeeded | OperationState::Failed => Some(OperationState::Running),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Queued => "queued",
            OperationState::Running => "running",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation ended up Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    NotFound,
    RemoteRejected,
    /// The hypervisor call ran past the operation timeout.
    Timeout,
    /// The operation was abandoned: its process died, the call panicked, or
    /// its pool went away.
    Interrupted,
}

impl From<&HypervisorError> for FailureKind {
    fn from(err: &HypervisorError) -> Self {
        match err {
            HypervisorError::Unreachable(_) => FailureKind::Unreachable,
            HypervisorError::NotFound(_) => FailureKind::NotFound,
            HypervisorError::RemoteRejected(_) => FailureKind::RemoteRejected,
        }
    }
}

/// Failure details recorded with a Failed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Interrupted, message)
    }
}

impl From<HypervisorError> for Failure {
    fn from(err: HypervisorError) -> Self {
        Self::new(FailureKind::from(&err), err.to_string())
    }
}

/// Filters for listing operations. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationFilters {
    pub pool: Option<String>,
    pub resource_uuid: Option<String>,
    pub kind: Option<OperationKind>,
    pub state: Option<OperationState>,
    /// At most this many, newest first (default 100, max 1000).
    pub limit: Option<u32>,
}
