use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_hypervisor::HypervisorError;
use fleet_orchestrator::OrchestratorError;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    ResourceBusy {
        message: String,
        existing_operation_id: String,
    },
    RemoteRejected(String),
    Unreachable(String),
    Unavailable(String),
    Internal(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error_kind: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_operation_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_kind, error, existing_operation_id) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::ResourceBusy {
                message,
                existing_operation_id,
            } => (
                StatusCode::CONFLICT,
                "resource_busy",
                message,
                Some(existing_operation_id),
            ),
            ApiError::RemoteRejected(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "remote_rejected", msg, None)
            }
            ApiError::Unreachable(msg) => (StatusCode::BAD_GATEWAY, "unreachable", msg, None),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "pool_unavailable", msg, None)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg, None),
        };

        let body = ErrorBody {
            error_kind: error_kind.to_string(),
            error,
            existing_operation_id,
        };
        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            OrchestratorError::ResourceBusy {
                ref existing_operation_id,
            } => ApiError::ResourceBusy {
                existing_operation_id: existing_operation_id.clone(),
                message: err.to_string(),
            },
            OrchestratorError::NotFound(_) | OrchestratorError::UnknownPool(_) => {
                ApiError::NotFound(err.to_string())
            }
            OrchestratorError::Hypervisor(e) => e.into(),
            OrchestratorError::PoolUnavailable(_) => ApiError::Unavailable(err.to_string()),
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<HypervisorError> for ApiError {
    fn from(err: HypervisorError) -> Self {
        match err {
            HypervisorError::NotFound(_) => ApiError::NotFound(err.to_string()),
            HypervisorError::Unreachable(_) => ApiError::Unreachable(err.to_string()),
            HypervisorError::RemoteRejected(_) => ApiError::RemoteRejected(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
