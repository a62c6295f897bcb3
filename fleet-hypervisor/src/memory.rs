//! In-memory hypervisor backend.
//!
//! Simulates a set of pools without talking to any hypervisor. Used by the
//! test suites and by the service when no real client is wired in. Power and
//! destroy preconditions follow XenAPI: starting a running VM or destroying a
//! running VM is rejected.
//!
//! Fault injection:
//! - [`InMemoryHypervisor::set_unreachable`] makes every call on a pool fail
//! - [`InMemoryHypervisor::reject_next`] fails the next mutating call on one resource
//! - [`InMemoryHypervisor::set_latency`] delays every mutating call

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::client::HypervisorClient;
use crate::error::{HypervisorError, Result};
use crate::types::*;

#[derive(Default)]
struct PoolState {
    hosts: BTreeMap<String, HostSummary>,
    templates: BTreeMap<String, TemplateSummary>,
    vms: BTreeMap<String, VmDetails>,
    networks: BTreeMap<String, MemoryNetwork>,
}

struct MemoryNetwork {
    name_label: String,
    name_description: String,
    vlan: Option<u32>,
    other_config: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    pools: HashMap<String, PoolState>,
    unreachable: HashSet<String>,
    rejections: HashMap<(String, String), String>,
}

/// Simulated multi-pool hypervisor.
#[derive(Default)]
pub struct InMemoryHypervisor {
    state: RwLock<State>,
    latency_ms: AtomicU64,
    mutations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tracks concurrent mutating calls for the lifetime of one call.
struct InFlight<'a>(&'a InMemoryHypervisor);

impl<'a> InFlight<'a> {
    fn enter(hv: &'a InMemoryHypervisor) -> Self {
        hv.mutations.fetch_add(1, Ordering::SeqCst);
        let now = hv.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        hv.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(hv)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend seeded with a small inventory for each named pool: two hosts,
    /// two templates, one network and two VMs (one running, one halted).
    pub fn with_demo_pools<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hv = Self::new();
        for pool in pools {
            let pool = pool.as_ref();
            hv.add_pool(pool);
            hv.add_host(pool, &format!("{pool}-host-01"));
            hv.add_host(pool, &format!("{pool}-host-02"));
            hv.add_template(pool, "debian-12");
            hv.add_template(pool, "ubuntu-24.04");
            let net = hv.add_network(pool, "management", Some(100));
            let web = hv.add_vm(pool, &format!("{pool}-web-01"), PowerState::Running);
            hv.add_vm(pool, &format!("{pool}-db-01"), PowerState::Halted);
            hv.attach_vm_to_network(pool, &web, &net);
        }
        info!("In-memory hypervisor seeded with demo pools");
        hv
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_pool(&self, pool: &str) {
        self.write().pools.entry(pool.to_string()).or_default();
    }

    pub fn add_host(&self, pool: &str, name: &str) -> String {
        let uuid = Uuid::new_v4().to_string();
        let mut state = self.write();
        let index = state.pools.get(pool).map_or(0, |p| p.hosts.len()) + 1;
        state.pools.entry(pool.to_string()).or_default().hosts.insert(
            uuid.clone(),
            HostSummary {
                uuid: uuid.clone(),
                name_label: name.to_string(),
                address: Some(format!("10.0.0.{index}")),
                enabled: true,
            },
        );
        uuid
    }

    pub fn add_template(&self, pool: &str, name: &str) -> String {
        let uuid = Uuid::new_v4().to_string();
        self.write()
            .pools
            .entry(pool.to_string())
            .or_default()
            .templates
            .insert(
                uuid.clone(),
                TemplateSummary {
                    uuid: uuid.clone(),
                    name_label: name.to_string(),
                },
            );
        uuid
    }

    pub fn add_vm(&self, pool: &str, name: &str, power_state: PowerState) -> String {
        let uuid = Uuid::new_v4().to_string();
        let mut state = self.write();
        let pool_state = state.pools.entry(pool.to_string()).or_default();
        let resident_on = match power_state {
            PowerState::Running | PowerState::Paused => pool_state.hosts.keys().next().cloned(),
            _ => None,
        };
        pool_state.vms.insert(
            uuid.clone(),
            VmDetails {
                uuid: uuid.clone(),
                name_label: name.to_string(),
                name_description: String::new(),
                power_state,
                vcpus: 2,
                memory_mib: 2048,
                resident_on,
                networks: Vec::new(),
                disks: vec![root_disk(name, 20480)],
                template: None,
                other_config: BTreeMap::new(),
            },
        );
        uuid
    }

    pub fn add_network(&self, pool: &str, name: &str, vlan: Option<u32>) -> String {
        let uuid = Uuid::new_v4().to_string();
        self.write()
            .pools
            .entry(pool.to_string())
            .or_default()
            .networks
            .insert(
                uuid.clone(),
                MemoryNetwork {
                    name_label: name.to_string(),
                    name_description: String::new(),
                    vlan,
                    other_config: BTreeMap::new(),
                },
            );
        uuid
    }

    pub fn attach_vm_to_network(&self, pool: &str, vm: &str, network: &str) {
        if let Some(vm) = self
            .write()
            .pools
            .get_mut(pool)
            .and_then(|p| p.vms.get_mut(vm))
        {
            if !vm.networks.iter().any(|n| n == network) {
                vm.networks.push(network.to_string());
            }
        }
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    pub fn set_unreachable(&self, pool: &str, unreachable: bool) {
        let mut state = self.write();
        if unreachable {
            state.unreachable.insert(pool.to_string());
        } else {
            state.unreachable.remove(pool);
        }
    }

    /// Fail the next mutating call against `uuid` with `RemoteRejected(reason)`.
    pub fn reject_next(&self, pool: &str, uuid: &str, reason: &str) {
        self.write()
            .rejections
            .insert((pool.to_string(), uuid.to_string()), reason.to_string());
    }

    /// Delay applied to every mutating call before it touches state.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of mutating calls received so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Highest number of mutating calls that were in progress at once.
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn power_state(&self, pool: &str, uuid: &str) -> Option<PowerState> {
        self.read()
            .pools
            .get(pool)
            .and_then(|p| p.vms.get(uuid))
            .map(|vm| vm.power_state)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Latency, reachability and one-shot rejection checks shared by every
    /// mutating call.
    async fn begin_mutation(&self, pool: &str, uuid: Option<&str>) -> Result<InFlight<'_>> {
        let guard = InFlight::enter(self);
        self.simulate_latency().await;

        let mut state = self.write();
        check_reachable(&state, pool)?;
        if let Some(uuid) = uuid {
            if let Some(reason) = state
                .rejections
                .remove(&(pool.to_string(), uuid.to_string()))
            {
                return Err(HypervisorError::RemoteRejected(reason));
            }
        }
        Ok(guard)
    }
}

fn root_disk(vm_name: &str, size_mib: u64) -> VmDisk {
    VmDisk {
        device: "xvda".to_string(),
        name_label: format!("{vm_name} root"),
        size_mib,
        sr_name: "Local storage".to_string(),
    }
}

fn check_reachable(state: &State, pool: &str) -> Result<()> {
    if state.unreachable.contains(pool) || !state.pools.contains_key(pool) {
        return Err(HypervisorError::Unreachable(pool.to_string()));
    }
    Ok(())
}

fn pool_ref<'a>(state: &'a State, pool: &str) -> Result<&'a PoolState> {
    check_reachable(state, pool)?;
    state
        .pools
        .get(pool)
        .ok_or_else(|| HypervisorError::Unreachable(pool.to_string()))
}

fn pool_mut<'a>(state: &'a mut State, pool: &str) -> Result<&'a mut PoolState> {
    state
        .pools
        .get_mut(pool)
        .ok_or_else(|| HypervisorError::Unreachable(pool.to_string()))
}

fn vm_mut<'a>(pool: &'a mut PoolState, uuid: &str) -> Result<&'a mut VmDetails> {
    pool.vms
        .get_mut(uuid)
        .ok_or_else(|| HypervisorError::NotFound(format!("VM {uuid}")))
}

/// Resolve a template, host or network reference given either by uuid or
/// by name label.
fn resolve<'a, V>(
    map: &'a BTreeMap<String, V>,
    reference: &str,
    label: impl Fn(&V) -> &str,
) -> Option<&'a String> {
    if let Some((uuid, _)) = map.get_key_value(reference) {
        return Some(uuid);
    }
    map.iter()
        .find(|(_, v)| label(v) == reference)
        .map(|(uuid, _)| uuid)
}

#[async_trait]
impl HypervisorClient for InMemoryHypervisor {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_hosts(&self, pool: &str) -> Result<Vec<HostSummary>> {
        let state = self.read();
        Ok(pool_ref(&state, pool)?.hosts.values().cloned().collect())
    }

    async fn list_vms(&self, pool: &str) -> Result<Vec<VmSummary>> {
        let state = self.read();
        let mut vms: Vec<VmSummary> = pool_ref(&state, pool)?
            .vms
            .values()
            .map(|vm| VmSummary {
                uuid: vm.uuid.clone(),
                name_label: vm.name_label.clone(),
                power_state: vm.power_state,
            })
            .collect();
        vms.sort_by(|a, b| a.name_label.cmp(&b.name_label));
        Ok(vms)
    }

    async fn get_vm_details(&self, pool: &str, uuid: &str) -> Result<VmDetails> {
        let state = self.read();
        pool_ref(&state, pool)?
            .vms
            .get(uuid)
            .cloned()
            .ok_or_else(|| HypervisorError::NotFound(format!("VM {uuid}")))
    }

    async fn list_networks(&self, pool: &str) -> Result<Vec<NetworkSummary>> {
        let state = self.read();
        Ok(pool_ref(&state, pool)?
            .networks
            .iter()
            .map(|(uuid, net)| NetworkSummary {
                uuid: uuid.clone(),
                name_label: net.name_label.clone(),
                vlan: net.vlan,
            })
            .collect())
    }

    async fn get_network_details(&self, pool: &str, uuid: &str) -> Result<NetworkDetails> {
        let state = self.read();
        let pool_state = pool_ref(&state, pool)?;
        let net = pool_state
            .networks
            .get(uuid)
            .ok_or_else(|| HypervisorError::NotFound(format!("network {uuid}")))?;

        let attached_vms = pool_state
            .vms
            .values()
            .filter(|vm| vm.networks.iter().any(|n| n == uuid))
            .map(|vm| vm.name_label.clone())
            .collect();

        Ok(NetworkDetails {
            uuid: uuid.to_string(),
            name_label: net.name_label.clone(),
            name_description: net.name_description.clone(),
            vlan: net.vlan,
            attached_vms,
            other_config: net.other_config.clone(),
        })
    }

    async fn list_templates(&self, pool: &str) -> Result<Vec<TemplateSummary>> {
        let state = self.read();
        Ok(pool_ref(&state, pool)?.templates.values().cloned().collect())
    }

    #[instrument(skip(self, changes), fields(pool = %pool, vm_uuid = %uuid))]
    async fn update_vm(&self, pool: &str, uuid: &str, changes: &VmUpdate) -> Result<()> {
        let _guard = self.begin_mutation(pool, Some(uuid)).await?;
        let mut state = self.write();
        let vm = vm_mut(pool_mut(&mut state, pool)?, uuid)?;

        if vm.power_state == PowerState::Running
            && (changes.cpu_cores.is_some() || changes.memory_mib.is_some())
        {
            return Err(HypervisorError::RemoteRejected(
                "vm running: halt it before changing vCPUs or memory".to_string(),
            ));
        }

        if let Some(description) = &changes.description {
            vm.name_description = description.clone();
        }
        if let Some(cpu_cores) = changes.cpu_cores {
            vm.vcpus = cpu_cores;
        }
        if let Some(memory_mib) = changes.memory_mib {
            vm.memory_mib = memory_mib;
        }
        if let Some(backup) = changes.backup {
            vm.other_config.insert(
                BACKUP_FLAG_KEY.to_string(),
                if backup { "1" } else { "0" }.to_string(),
            );
        }

        debug!("VM updated");
        Ok(())
    }

    #[instrument(skip(self), fields(pool = %pool, vm_uuid = %uuid))]
    async fn power_action(
        &self,
        pool: &str,
        uuid: &str,
        action: PowerAction,
    ) -> Result<PowerState> {
        let _guard = self.begin_mutation(pool, Some(uuid)).await?;
        let mut state = self.write();
        let pool_state = pool_mut(&mut state, pool)?;
        let first_host = pool_state.hosts.keys().next().cloned();
        let vm = vm_mut(pool_state, uuid)?;

        match (action, vm.power_state) {
            (PowerAction::Start, PowerState::Halted) => {
                vm.power_state = PowerState::Running;
                vm.resident_on = first_host;
            }
            (PowerAction::Start, current) => {
                return Err(HypervisorError::RemoteRejected(format!(
                    "vm not halted (power state {current})"
                )));
            }
            (
                PowerAction::CleanShutdown | PowerAction::HardShutdown,
                PowerState::Running | PowerState::Paused,
            ) => {
                vm.power_state = PowerState::Halted;
                vm.resident_on = None;
            }
            (
                PowerAction::CleanReboot | PowerAction::HardReboot,
                PowerState::Running | PowerState::Paused,
            ) => {
                vm.power_state = PowerState::Running;
            }
            (_, current) => {
                return Err(HypervisorError::RemoteRejected(format!(
                    "vm not running (power state {current})"
                )));
            }
        }

        info!(power_state = %vm.power_state, "Power action applied");
        Ok(vm.power_state)
    }

    #[instrument(skip(self), fields(pool = %pool, vm_uuid = %uuid))]
    async fn destroy_vm(&self, pool: &str, uuid: &str) -> Result<()> {
        let _guard = self.begin_mutation(pool, Some(uuid)).await?;
        let mut state = self.write();
        let pool_state = pool_mut(&mut state, pool)?;
        let vm = vm_mut(pool_state, uuid)?;

        if vm.power_state != PowerState::Halted {
            return Err(HypervisorError::RemoteRejected("vm running".to_string()));
        }

        pool_state.vms.remove(uuid);
        info!("VM destroyed");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(pool = %pool, vm_name = %spec.name))]
    async fn deploy_vm(&self, pool: &str, spec: &VmDeploySpec) -> Result<String> {
        let _guard = self.begin_mutation(pool, None).await?;
        let mut state = self.write();
        let pool_state = pool_mut(&mut state, pool)?;

        let template = resolve(&pool_state.templates, &spec.template, |t| t.name_label.as_str())
            .cloned()
            .ok_or_else(|| HypervisorError::NotFound(format!("template {}", spec.template)))?;

        let host = match &spec.host {
            Some(host) => Some(
                resolve(&pool_state.hosts, host, |h| h.name_label.as_str())
                    .cloned()
                    .ok_or_else(|| HypervisorError::NotFound(format!("host {host}")))?,
            ),
            None => pool_state.hosts.keys().next().cloned(),
        };

        let networks = match &spec.network {
            Some(network) => vec![resolve(&pool_state.networks, network, |n| n.name_label.as_str())
                .cloned()
                .ok_or_else(|| HypervisorError::NotFound(format!("network {network}")))?],
            None => Vec::new(),
        };

        if pool_state.vms.values().any(|vm| vm.name_label == spec.name) {
            return Err(HypervisorError::RemoteRejected(format!(
                "a VM named {} already exists",
                spec.name
            )));
        }

        let mut other_config = spec.other_config.clone();
        if let Some(master) = &spec.puppetmaster {
            other_config.insert(PUPPETMASTER_KEY.to_string(), master.clone());
        }

        let uuid = Uuid::new_v4().to_string();
        pool_state.vms.insert(
            uuid.clone(),
            VmDetails {
                uuid: uuid.clone(),
                name_label: spec.name.clone(),
                name_description: spec.description.clone().unwrap_or_default(),
                power_state: PowerState::Running,
                vcpus: spec.cpu_cores.unwrap_or(1),
                memory_mib: spec.memory_mib.unwrap_or(1024),
                resident_on: host,
                networks,
                disks: vec![root_disk(&spec.name, 10240)],
                template: Some(template),
                other_config,
            },
        );

        info!(vm_uuid = %uuid, "VM deployed");
        Ok(uuid)
    }

    #[instrument(skip(self, spec), fields(pool = %pool, network_name = %spec.name))]
    async fn create_network(&self, pool: &str, spec: &NetworkSpec) -> Result<String> {
        let _guard = self.begin_mutation(pool, None).await?;
        let mut state = self.write();
        let pool_state = pool_mut(&mut state, pool)?;

        if let Some(vlan) = spec.vlan {
            if pool_state.networks.values().any(|n| n.vlan == Some(vlan)) {
                return Err(HypervisorError::RemoteRejected(format!(
                    "VLAN {vlan} already in use"
                )));
            }
        }

        let uuid = Uuid::new_v4().to_string();
        pool_state.networks.insert(
            uuid.clone(),
            MemoryNetwork {
                name_label: spec.name.clone(),
                name_description: spec.description.clone().unwrap_or_default(),
                vlan: spec.vlan,
                other_config: spec.other_config.clone(),
            },
        );

        info!(network_uuid = %uuid, "Network created");
        Ok(uuid)
    }

    #[instrument(skip(self, changes), fields(pool = %pool, network_uuid = %uuid))]
    async fn update_network(&self, pool: &str, uuid: &str, changes: &NetworkUpdate) -> Result<()> {
        let _guard = self.begin_mutation(pool, Some(uuid)).await?;
        let mut state = self.write();
        let net = pool_mut(&mut state, pool)?
            .networks
            .get_mut(uuid)
            .ok_or_else(|| HypervisorError::NotFound(format!("network {uuid}")))?;

        if let Some(name) = &changes.name {
            net.name_label = name.clone();
        }
        if let Some(description) = &changes.description {
            net.name_description = description.clone();
        }
        if let Some(other_config) = &changes.other_config {
            net.other_config.extend(other_config.clone());
        }

        debug!("Network updated");
        Ok(())
    }
}
