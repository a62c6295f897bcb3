//! Pool inventory and resource-shaped lifecycle routes.
//!
//! Reads go straight to the hypervisor client. Every mutation is submitted
//! as a lifecycle operation and answered with 202.

use crate::{
    error::{ApiResult, ErrorBody},
    routes::operations::{accept, SubmitResponse},
    state::AppState,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fleet_hypervisor::{
    HostSummary, NetworkDetails, NetworkSpec, NetworkSummary, NetworkUpdate, TemplateSummary,
    VmDeploySpec, VmDetails, VmSummary, VmUpdate,
};
use fleet_orchestrator::{LifecycleRequest, OperationKind, PoolStats};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use utoipa::IntoParams;

type Accepted = ApiResult<(StatusCode, Json<SubmitResponse>)>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/pools", get(list_pools))
        .route("/api/v1/pools/{pool}/hosts", get(list_hosts))
        .route("/api/v1/pools/{pool}/templates", get(list_templates))
        .route("/api/v1/pools/{pool}/vms", get(list_vms).post(deploy_vm))
        .route(
            "/api/v1/pools/{pool}/vms/{uuid}",
            get(get_vm).put(update_vm),
        )
        .route("/api/v1/pools/{pool}/vms/{uuid}/start", post(start_vm))
        .route("/api/v1/pools/{pool}/vms/{uuid}/stop", post(stop_vm))
        .route("/api/v1/pools/{pool}/vms/{uuid}/restart", post(restart_vm))
        .route("/api/v1/pools/{pool}/vms/{uuid}/destroy", post(destroy_vm))
        .route(
            "/api/v1/pools/{pool}/networks",
            get(list_networks).post(create_network),
        )
        .route(
            "/api/v1/pools/{pool}/networks/{uuid}",
            get(get_network).put(update_network),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PowerQuery {
    /// Hard shutdown or reboot instead of a clean one.
    #[serde(default)]
    pub force: bool,
}

fn submit_request(
    pool: String,
    uuid: String,
    kind: OperationKind,
    payload: Map<String, Value>,
) -> LifecycleRequest {
    LifecycleRequest {
        pool,
        resource_uuid: uuid,
        kind,
        payload,
    }
}

// =========================================================================
// Inventory
// =========================================================================

#[utoipa::path(
    get,
    path = "/api/v1/pools",
    responses((status = 200, description = "Configured pools with worker statistics", body = [PoolStats])),
    tag = "pools"
)]
pub async fn list_pools(State(state): State<AppState>) -> Json<Vec<PoolStats>> {
    Json(state.fleet.pool_stats())
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/hosts",
    params(("pool" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Hosts in the pool", body = [HostSummary]),
        (status = 404, description = "Pool not configured", body = ErrorBody),
        (status = 502, description = "Pool unreachable", body = ErrorBody)
    ),
    tag = "pools"
)]
pub async fn list_hosts(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<Json<Vec<HostSummary>>> {
    Ok(Json(state.fleet.list_hosts(&pool).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/templates",
    params(("pool" = String, Path, description = "Pool name")),
    responses((status = 200, description = "Templates a VM can be deployed from", body = [TemplateSummary])),
    tag = "pools"
)]
pub async fn list_templates(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<Json<Vec<TemplateSummary>>> {
    Ok(Json(state.fleet.list_templates(&pool).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/vms",
    params(("pool" = String, Path, description = "Pool name")),
    responses((status = 200, description = "VMs in the pool", body = [VmSummary])),
    tag = "vms"
)]
pub async fn list_vms(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<Json<Vec<VmSummary>>> {
    Ok(Json(state.fleet.list_vms(&pool).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/vms/{uuid}",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid")
    ),
    responses(
        (status = 200, description = "VM details", body = VmDetails),
        (status = 404, description = "Unknown pool or VM", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn get_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
) -> ApiResult<Json<VmDetails>> {
    Ok(Json(state.fleet.get_vm_details(&pool, &uuid).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/networks",
    params(("pool" = String, Path, description = "Pool name")),
    responses((status = 200, description = "Networks in the pool", body = [NetworkSummary])),
    tag = "networks"
)]
pub async fn list_networks(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> ApiResult<Json<Vec<NetworkSummary>>> {
    Ok(Json(state.fleet.list_networks(&pool).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/pools/{pool}/networks/{uuid}",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "Network uuid")
    ),
    responses(
        (status = 200, description = "Network details", body = NetworkDetails),
        (status = 404, description = "Unknown pool or network", body = ErrorBody)
    ),
    tag = "networks"
)]
pub async fn get_network(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
) -> ApiResult<Json<NetworkDetails>> {
    Ok(Json(state.fleet.get_network_details(&pool, &uuid).await?))
}

// =========================================================================
// VM lifecycle
// =========================================================================

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/vms/{uuid}/start",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid")
    ),
    responses(
        (status = 202, description = "Start queued", body = SubmitResponse),
        (status = 409, description = "Resource busy", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn start_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
) -> Accepted {
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::Start, Map::new()),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/vms/{uuid}/stop",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid"),
        PowerQuery
    ),
    responses(
        (status = 202, description = "Stop queued", body = SubmitResponse),
        (status = 409, description = "Resource busy", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn stop_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
    query: Result<Query<PowerQuery>, QueryRejection>,
) -> Accepted {
    let Query(power) = query?;
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::Stop, force_payload(&power)),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/vms/{uuid}/restart",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid"),
        PowerQuery
    ),
    responses(
        (status = 202, description = "Restart queued", body = SubmitResponse),
        (status = 409, description = "Resource busy", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn restart_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
    query: Result<Query<PowerQuery>, QueryRejection>,
) -> Accepted {
    let Query(power) = query?;
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::Restart, force_payload(&power)),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/vms/{uuid}/destroy",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid")
    ),
    responses(
        (status = 202, description = "Destroy queued", body = SubmitResponse),
        (status = 409, description = "Resource busy", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn destroy_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
) -> Accepted {
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::Destroy, Map::new()),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/vms",
    params(("pool" = String, Path, description = "Pool name")),
    request_body = VmDeploySpec,
    responses(
        (status = 202, description = "Deploy queued", body = SubmitResponse),
        (status = 400, description = "Invalid deploy request", body = ErrorBody),
        (status = 409, description = "A VM with this name is being deployed", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn deploy_vm(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Accepted {
    let Json(spec) = payload?;
    accept(
        &state,
        submit_request(pool, String::new(), OperationKind::Deploy, spec),
    )
    .await
}

#[utoipa::path(
    put,
    path = "/api/v1/pools/{pool}/vms/{uuid}",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "VM uuid")
    ),
    request_body = VmUpdate,
    responses(
        (status = 202, description = "Update queued", body = SubmitResponse),
        (status = 400, description = "Invalid update", body = ErrorBody)
    ),
    tag = "vms"
)]
pub async fn update_vm(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Accepted {
    let Json(changes) = payload?;
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::VmUpdate, changes),
    )
    .await
}

// =========================================================================
// Networks
// =========================================================================

#[utoipa::path(
    post,
    path = "/api/v1/pools/{pool}/networks",
    params(("pool" = String, Path, description = "Pool name")),
    request_body = NetworkSpec,
    responses(
        (status = 202, description = "Network creation queued", body = SubmitResponse),
        (status = 400, description = "Invalid network request", body = ErrorBody)
    ),
    tag = "networks"
)]
pub async fn create_network(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Accepted {
    let Json(spec) = payload?;
    accept(
        &state,
        submit_request(pool, String::new(), OperationKind::NetworkCreate, spec),
    )
    .await
}

#[utoipa::path(
    put,
    path = "/api/v1/pools/{pool}/networks/{uuid}",
    params(
        ("pool" = String, Path, description = "Pool name"),
        ("uuid" = String, Path, description = "Network uuid")
    ),
    request_body = NetworkUpdate,
    responses(
        (status = 202, description = "Network update queued", body = SubmitResponse),
        (status = 400, description = "Invalid update", body = ErrorBody)
    ),
    tag = "networks"
)]
pub async fn update_network(
    State(state): State<AppState>,
    Path((pool, uuid)): Path<(String, String)>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Accepted {
    let Json(changes) = payload?;
    accept(
        &state,
        submit_request(pool, uuid, OperationKind::NetworkUpdate, changes),
    )
    .await
}

fn force_payload(power: &PowerQuery) -> Map<String, Value> {
    let mut payload = Map::new();
    if power.force {
        payload.insert("force".to_string(), json!(true));
    }
    payload
}
