//! Types exchanged with hypervisor clients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;

/// Other-config key XenCenter uses for its "backup" custom field.
pub const BACKUP_FLAG_KEY: &str = "XenCenter.CustomFields.backup";

/// Other-config key recording the puppetmaster a deployed VM enrolls with.
pub const PUPPETMASTER_KEY: &str = "puppetmaster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PowerState {
    Running,
    Halted,
    Paused,
    Suspended,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Running => "Running",
            PowerState::Halted => "Halted",
            PowerState::Paused => "Paused",
            PowerState::Suspended => "Suspended",
        };
        f.write_str(s)
    }
}

/// Power transitions a client can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    CleanShutdown,
    HardShutdown,
    CleanReboot,
    HardReboot,
}

impl PowerAction {
    /// Power state the VM is expected to reach once the action completes.
    pub fn target_state(&self) -> PowerState {
        match self {
            PowerAction::Start | PowerAction::CleanReboot | PowerAction::HardReboot => {
                PowerState::Running
            }
            PowerAction::CleanShutdown | PowerAction::HardShutdown => PowerState::Halted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HostSummary {
    pub uuid: String,
    pub name_label: String,
    pub address: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VmSummary {
    pub uuid: String,
    pub name_label: String,
    pub power_state: PowerState,
}

/// A virtual disk attached to a VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VmDisk {
    /// Guest device name, e.g. `xvda`.
    pub device: String,
    pub name_label: String,
    pub size_mib: u64,
    /// Name of the storage repository holding the disk.
    pub sr_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VmDetails {
    pub uuid: String,
    pub name_label: String,
    pub name_description: String,
    pub power_state: PowerState,
    pub vcpus: u32,
    pub memory_mib: u64,
    /// Host the VM runs on; only known while it is running.
    pub resident_on: Option<String>,
    /// Uuids of the networks the VM has interfaces on.
    pub networks: Vec<String>,
    /// Disks in device order.
    pub disks: Vec<VmDisk>,
    pub template: Option<String>,
    pub other_config: BTreeMap<String, String>,
}

impl VmDetails {
    pub fn backup_enabled(&self) -> bool {
        self.other_config
            .get(BACKUP_FLAG_KEY)
            .is_some_and(|v| v == "1")
    }
}

/// Parameters for deploying a new VM from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct VmDeploySpec {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mib: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Puppetmaster hostname the new VM enrolls with.
    #[serde(default)]
    pub puppetmaster: Option<String>,
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
}

/// Editable VM fields. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct VmUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mib: Option<u64>,
    #[serde(default)]
    pub backup: Option<bool>,
}

impl VmUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.cpu_cores.is_none()
            && self.memory_mib.is_none()
            && self.backup.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NetworkSummary {
    pub uuid: String,
    pub name_label: String,
    pub vlan: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NetworkDetails {
    pub uuid: String,
    pub name_label: String,
    pub name_description: String,
    pub vlan: Option<u32>,
    /// Names of the VMs with an interface on this network.
    pub attached_vms: Vec<String>,
    pub other_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vlan: Option<u32>,
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub other_config: Option<BTreeMap<String, String>>,
}

impl NetworkUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.other_config.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TemplateSummary {
    pub uuid: String,
    pub name_label: String,
}
