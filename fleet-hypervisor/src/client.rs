//! The capability interface the orchestrator consumes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Client for a set of hypervisor pools.
///
/// Every call is addressed by pool name; how a pool name maps to a pool
/// master connection is up to the implementation. Implementations must be
/// safe to share between worker tasks.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// Name of the backend (e.g. "xenapi", "memory").
    fn name(&self) -> &'static str;

    // =========================================================================
    // Inventory
    // =========================================================================

    async fn list_hosts(&self, pool: &str) -> Result<Vec<HostSummary>>;

    async fn list_vms(&self, pool: &str) -> Result<Vec<VmSummary>>;

    async fn get_vm_details(&self, pool: &str, uuid: &str) -> Result<VmDetails>;

    async fn list_networks(&self, pool: &str) -> Result<Vec<NetworkSummary>>;

    async fn get_network_details(&self, pool: &str, uuid: &str) -> Result<NetworkDetails>;

    /// Templates a new VM can be deployed from.
    async fn list_templates(&self, pool: &str) -> Result<Vec<TemplateSummary>>;

    // =========================================================================
    // VM lifecycle
    // =========================================================================

    async fn update_vm(&self, pool: &str, uuid: &str, fields: &VmUpdate) -> Result<()>;

    /// Perform a power action and return the resulting power state.
    async fn power_action(&self, pool: &str, uuid: &str, action: PowerAction)
        -> Result<PowerState>;

    /// Destroy a VM. The VM must be halted.
    async fn destroy_vm(&self, pool: &str, uuid: &str) -> Result<()>;

    /// Deploy a new VM from a template. Returns the new VM's uuid.
    async fn deploy_vm(&self, pool: &str, spec: &VmDeploySpec) -> Result<String>;

    // =========================================================================
    // Networks
    // =========================================================================

    /// Create a network. Returns the new network's uuid.
    async fn create_network(&self, pool: &str, spec: &NetworkSpec) -> Result<String>;

    async fn update_network(&self, pool: &str, uuid: &str, fields: &NetworkUpdate) -> Result<()>;
}
