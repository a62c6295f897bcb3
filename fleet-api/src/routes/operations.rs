use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use fleet_orchestrator::{
    LifecycleRequest, Operation, OperationFilters, OperationState, ResourceLock,
};
use serde::Serialize;
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/operations",
            get(list_operations).post(submit_operation),
        )
        .route("/api/v1/operations/{id}", get(get_operation))
        .route("/api/v1/locks", get(list_locks))
}

/// Returned when a lifecycle request is accepted.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub operation_id: String,
    pub state: OperationState,
}

impl From<Operation> for SubmitResponse {
    fn from(op: Operation) -> Self {
        Self {
            operation_id: op.id,
            state: op.state,
        }
    }
}

/// Submit a request and answer 202 with the new operation's id.
pub(crate) async fn accept(
    state: &AppState,
    request: LifecycleRequest,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let operation = state.fleet.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(operation.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/operations",
    request_body = LifecycleRequest,
    responses(
        (status = 202, description = "Operation queued", body = SubmitResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
        (status = 409, description = "Another operation holds the resource", body = crate::error::ErrorBody)
    ),
    tag = "operations"
)]
pub async fn submit_operation(
    State(state): State<AppState>,
    payload: Result<Json<LifecycleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload?;
    accept(&state, request).await
}

#[utoipa::path(
    get,
    path = "/api/v1/operations",
    params(OperationFilters),
    responses((status = 200, description = "Operations, newest first", body = [Operation])),
    tag = "operations"
)]
pub async fn list_operations(
    State(state): State<AppState>,
    query: Result<Query<OperationFilters>, QueryRejection>,
) -> ApiResult<Json<Vec<Operation>>> {
    let Query(filters) = query?;
    let operations = state.fleet.list_operations(&filters).await?;

    Ok(Json(operations))
}

#[utoipa::path(
    get,
    path = "/api/v1/operations/{id}",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Operation snapshot", body = Operation),
        (status = 404, description = "Unknown operation", body = crate::error::ErrorBody)
    ),
    tag = "operations"
)]
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Operation>> {
    let operation = state.fleet.get_operation(&id).await?;

    Ok(Json(operation))
}

#[utoipa::path(
    get,
    path = "/api/v1/locks",
    responses((status = 200, description = "Resource locks currently held", body = [ResourceLock])),
    tag = "operations"
)]
pub async fn list_locks(State(state): State<AppState>) -> ApiResult<Json<Vec<ResourceLock>>> {
    Ok(Json(state.fleet.list_locks().await?))
}
