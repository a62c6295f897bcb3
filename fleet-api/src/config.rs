use fleet_orchestrator::FleetConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Service settings. The fleet itself (pools, limits) is configured through
/// [`FleetConfig`], loaded from `config_path` when set.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_config_path")]
    pub config_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    std::env::var("FLEET_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("FLEET_API_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleet")
        .join("api")
        .join("fleet.db")
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var("FLEET_CONFIG").ok().map(PathBuf::from)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            config_path: default_config_path(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Fleet config from `config_path` if set, else defaults plus `FLEET_*`
    /// overrides.
    pub fn load_fleet_config(&self) -> fleet_orchestrator::Result<FleetConfig> {
        match &self.config_path {
            Some(path) => FleetConfig::load_from_path(path),
            None => Ok(FleetConfig::from_env()),
        }
    }
}
