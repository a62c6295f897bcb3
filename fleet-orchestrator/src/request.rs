//! Lifecycle requests and their validation.

use crate::config::FleetConfig;
use crate::error::{OrchestratorError, Result};
use fleet_hypervisor::{NetworkSpec, NetworkUpdate, PowerAction, VmDeploySpec, VmUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Stop,
    Restart,
    Destroy,
    Deploy,
    VmUpdate,
    NetworkCreate,
    NetworkUpdate,
}

impl OperationKind {
    /// Whether the kind acts on a resource that already exists, and so
    /// needs a resource uuid.
    pub fn targets_existing(&self) -> bool {
        !matches!(self, OperationKind::Deploy | OperationKind::NetworkCreate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::Restart => "restart",
            OperationKind::Destroy => "destroy",
            OperationKind::Deploy => "deploy",
            OperationKind::VmUpdate => "vm_update",
            OperationKind::NetworkCreate => "network_create",
            OperationKind::NetworkUpdate => "network_update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to change the state of one VM or network in one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LifecycleRequest {
    pub pool: String,

    /// Target resource. Empty for deploys and network creation.
    #[serde(default)]
    pub resource_uuid: String,

    pub kind: OperationKind,

    /// Kind-specific parameters.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Map<String, Value>,
}

impl LifecycleRequest {
    pub fn new(pool: impl Into<String>, resource_uuid: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            pool: pool.into(),
            resource_uuid: resource_uuid.into(),
            kind,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.payload = map;
        }
        self
    }

    /// Check the request against the configured pools and parse its payload.
    pub fn validate(&self, config: &FleetConfig) -> Result<Action> {
        if self.pool.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "pool must not be empty".to_string(),
            ));
        }
        if !config.has_pool(&self.pool) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "unknown pool: {}",
                self.pool
            )));
        }
        if self.kind.targets_existing() && self.resource_uuid.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "{} requires a resource_uuid",
                self.kind
            )));
        }
        self.action()
    }

    /// Parse the payload into the action the worker will perform.
    pub fn action(&self) -> Result<Action> {
        let action = match self.kind {
            OperationKind::Start => {
                self.payload_as::<NoOptions>()?;
                Action::Power(PowerAction::Start)
            }
            OperationKind::Stop => {
                let opts: ForceOptions = self.payload_as()?;
                Action::Power(if opts.force {
                    PowerAction::HardShutdown
                } else {
                    PowerAction::CleanShutdown
                })
            }
            OperationKind::Restart => {
                let opts: ForceOptions = self.payload_as()?;
                Action::Power(if opts.force {
                    PowerAction::HardReboot
                } else {
                    PowerAction::CleanReboot
                })
            }
            OperationKind::Destroy => {
                self.payload_as::<NoOptions>()?;
                Action::Destroy
            }
            OperationKind::Deploy => {
                let spec: VmDeploySpec = self.payload_as()?;
                require_non_empty("name", &spec.name)?;
                require_non_empty("template", &spec.template)?;
                Action::Deploy(spec)
            }
            OperationKind::VmUpdate => {
                let update: VmUpdate = self.payload_as()?;
                if update.is_empty() {
                    return Err(OrchestratorError::InvalidRequest(
                        "vm_update needs at least one field".to_string(),
                    ));
                }
                Action::UpdateVm(update)
            }
            OperationKind::NetworkCreate => {
                let spec: NetworkSpec = self.payload_as()?;
                require_non_empty("name", &spec.name)?;
                Action::CreateNetwork(spec)
            }
            OperationKind::NetworkUpdate => {
                let update: NetworkUpdate = self.payload_as()?;
                if update.is_empty() {
                    return Err(OrchestratorError::InvalidRequest(
                        "network_update needs at least one field".to_string(),
                    ));
                }
                Action::UpdateNetwork(update)
            }
        };
        Ok(action)
    }

    /// Key the resource lock is taken on.
    ///
    /// Existing resources lock on their uuid. New VMs and networks have no
    /// uuid yet, so they lock on the name being created instead, which stops
    /// two concurrent creates of the same name.
    pub fn lock_key(&self, action: &Action) -> String {
        if !self.resource_uuid.is_empty() {
            return self.resource_uuid.clone();
        }
        match action {
            Action::Deploy(spec) => format!("vm-name:{}", spec.name),
            Action::CreateNetwork(spec) => format!("network-name:{}", spec.name),
            _ => self.resource_uuid.clone(),
        }
    }

    fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            OrchestratorError::InvalidRequest(format!("invalid {} payload: {}", self.kind, e))
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ForceOptions {
    #[serde(default)]
    force: bool,
}

/// A validated request, ready to be executed against a hypervisor client.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Power(PowerAction),
    Destroy,
    Deploy(VmDeploySpec),
    UpdateVm(VmUpdate),
    CreateNetwork(NetworkSpec),
    UpdateNetwork(NetworkUpdate),
}
