//! Fleet configuration: which pools exist and how hard to drive them.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub name: String,

    /// Overrides `default_concurrency` for this pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_operation_timeout() -> u64 {
    300 // 5 minutes
}

fn default_stale_after() -> u64 {
    900 // 15 minutes
}

fn default_recovery_interval() -> u64 {
    60
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            default_concurrency: default_concurrency(),
            operation_timeout_secs: default_operation_timeout(),
            stale_after_secs: default_stale_after(),
            recovery_interval_secs: default_recovery_interval(),
        }
    }
}

impl FleetConfig {
    /// Config with the given pools and default limits.
    pub fn with_pools<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pools: pools.into_iter().map(PoolConfig::new).collect(),
            ..Self::default()
        }
    }

    /// Load from a YAML file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&contents)?;
        Ok(config.with_env_overrides())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `FLEET_*` environment variables on top of this config.
    ///
    /// `FLEET_POOLS` replaces the pool list (comma-separated names).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(pools) = std::env::var("FLEET_POOLS") {
            self.pools = pools
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PoolConfig::new)
                .collect();
        }
        if let Some(v) = env_parse("FLEET_CONCURRENCY") {
            self.default_concurrency = v;
        }
        if let Some(v) = env_parse("FLEET_OPERATION_TIMEOUT") {
            self.operation_timeout_secs = v;
        }
        if let Some(v) = env_parse("FLEET_STALE_AFTER") {
            self.stale_after_secs = v;
        }
        if let Some(v) = env_parse("FLEET_RECOVERY_INTERVAL") {
            self.recovery_interval_secs = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            return Err(OrchestratorError::Config(
                "at least one pool must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(OrchestratorError::Config(
                    "pool names must not be empty".to_string(),
                ));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(OrchestratorError::Config(format!(
                    "pool {} is configured twice",
                    pool.name
                )));
            }
            if pool.concurrency == Some(0) {
                return Err(OrchestratorError::Config(format!(
                    "pool {} has a concurrency of 0",
                    pool.name
                )));
            }
        }

        if self.default_concurrency == 0 {
            return Err(OrchestratorError::Config(
                "default_concurrency must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "operation_timeout_secs must be at least 1".to_string(),
            ));
        }
        // A live operation must never look stale to the recovery sweep.
        if self.stale_after_secs <= self.operation_timeout_secs {
            return Err(OrchestratorError::Config(format!(
                "stale_after_secs ({}) must exceed operation_timeout_secs ({})",
                self.stale_after_secs, self.operation_timeout_secs
            )));
        }
        if self.recovery_interval_secs == 0 {
            return Err(OrchestratorError::Config(
                "recovery_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn has_pool(&self, name: &str) -> bool {
        self.pools.iter().any(|p| p.name == name)
    }

    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.pools.iter().map(|p| p.name.as_str())
    }

    pub fn concurrency_for(&self, name: &str) -> usize {
        self.pools
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.concurrency)
            .unwrap_or(self.default_concurrency)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::with_pools(["p1", "p2"]);

        assert_eq!(config.default_concurrency, 4);
        assert_eq!(config.operation_timeout(), Duration::from_secs(300));
        assert_eq!(config.stale_after(), Duration::from_secs(900));
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_names().collect::<Vec<_>>(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_per_pool_concurrency() {
        let mut config = FleetConfig::with_pools(["p1", "p2"]);
        config.pools[1].concurrency = Some(1);

        assert_eq!(config.concurrency_for("p1"), 4);
        assert_eq!(config.concurrency_for("p2"), 1);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
pools:
  - name: xen-ams
    concurrency: 2
  - name: xen-fra
operation_timeout_secs: 120
stale_after_secs: 600
"#;
        let config: FleetConfig = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.concurrency_for("xen-ams"), 2);
        assert_eq!(config.concurrency_for("xen-fra"), 4);
        assert_eq!(config.operation_timeout_secs, 120);
        assert_eq!(config.recovery_interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pools:\n  - name: lab").unwrap();

        let config = FleetConfig::load_from_path(file.path()).unwrap();
        assert!(config.has_pool("lab"));
    }

    #[test]
    fn test_validate_rejects_empty_pools() {
        let config = FleetConfig::default();
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_pools() {
        let config = FleetConfig::with_pools(["p1", "p1"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = FleetConfig::with_pools(["p1"]);
        config.pools[0].concurrency = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_stale_threshold_above_timeout() {
        let mut config = FleetConfig::with_pools(["p1"]);
        config.operation_timeout_secs = 600;
        config.stale_after_secs = 600;
        assert!(config.validate().is_err());

        config.stale_after_secs = 601;
        assert!(config.validate().is_ok());
    }
}
