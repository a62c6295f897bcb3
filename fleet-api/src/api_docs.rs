use crate::error::ErrorBody;
use crate::routes::operations::SubmitResponse;
use fleet_hypervisor::{
    HostSummary, NetworkDetails, NetworkSpec, NetworkSummary, NetworkUpdate, PowerState,
    TemplateSummary, VmDeploySpec, VmDetails, VmDisk, VmSummary, VmUpdate,
};
use fleet_orchestrator::{
    FailureKind, LifecycleRequest, Operation, OperationKind, OperationState, PoolStats,
    ResourceLock,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::operations::submit_operation,
        crate::routes::operations::list_operations,
        crate::routes::operations::get_operation,
        crate::routes::operations::list_locks,
        crate::routes::pools::list_pools,
        crate::routes::pools::list_hosts,
        crate::routes::pools::list_templates,
        crate::routes::pools::list_vms,
        crate::routes::pools::get_vm,
        crate::routes::pools::start_vm,
        crate::routes::pools::stop_vm,
        crate::routes::pools::restart_vm,
        crate::routes::pools::destroy_vm,
        crate::routes::pools::deploy_vm,
        crate::routes::pools::update_vm,
        crate::routes::pools::list_networks,
        crate::routes::pools::get_network,
        crate::routes::pools::create_network,
        crate::routes::pools::update_network,
    ),
    components(
        schemas(
            LifecycleRequest,
            Operation,
            OperationKind,
            OperationState,
            FailureKind,
            ResourceLock,
            PoolStats,
            SubmitResponse,
            ErrorBody,
            HostSummary,
            VmSummary,
            VmDetails,
            VmDisk,
            PowerState,
            VmDeploySpec,
            VmUpdate,
            NetworkSummary,
            NetworkDetails,
            NetworkSpec,
            NetworkUpdate,
            TemplateSummary
        )
    ),
    tags(
        (name = "fleet-api", description = "Hypervisor fleet lifecycle API")
    )
)]
pub struct ApiDoc;
