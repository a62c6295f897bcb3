use crate::config::FleetConfig;
use crate::error::Result;
use crate::fleet::Fleet;
use crate::operation::Operation;
use fleet_hypervisor::{HypervisorClient, InMemoryHypervisor};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Helper to create an in-memory test database with migrations applied
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    // The path is relative to the crate root.
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Config for tests: the given pools, short timeouts.
pub fn test_config(pools: &[&str]) -> FleetConfig {
    let mut config = FleetConfig::with_pools(pools.iter().copied());
    config.operation_timeout_secs = 5;
    config.stale_after_secs = 10;
    config.recovery_interval_secs = 1;
    config
}

/// Start a fleet over a fresh in-memory database.
pub async fn start_test_fleet(
    config: FleetConfig,
    hypervisor: Arc<InMemoryHypervisor>,
) -> Result<Fleet> {
    let db = create_test_db().await;
    let client: Arc<dyn HypervisorClient> = hypervisor;
    Fleet::start(config, db, client).await
}

/// Poll until the operation reaches a terminal state.
pub async fn wait_for_terminal(fleet: &Fleet, id: &str, within: Duration) -> Operation {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let op = fleet
            .get_operation(id)
            .await
            .expect("Failed to poll operation");
        if op.is_terminal() {
            return op;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("operation {} still {} after {:?}", id, op.state, within);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
