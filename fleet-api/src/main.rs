use anyhow::{Context, Result};
use clap::Parser;
use fleet_api::{create_app, start_janitor_task, ApiConfig};
use fleet_hypervisor::{HypervisorClient, InMemoryHypervisor};
use fleet_orchestrator::db::{backup_database, create_pool, run_migrations};
use fleet_orchestrator::Fleet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Lifecycle operation service for hypervisor pools
#[derive(Debug, Parser)]
#[command(name = "fleet-api", version, about)]
struct Cli {
    /// Fleet config file (YAML). Overrides FLEET_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address. Overrides FLEET_API_BIND.
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database path. Overrides FLEET_API_DB_PATH.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = fleet_logging::init_subscriber();
    let cli = Cli::parse();

    info!("Starting fleet-api service...");

    // Load configuration
    let mut config = ApiConfig::from_env();
    if let Some(path) = cli.config {
        config.config_path = Some(path);
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    let fleet_config = config
        .load_fleet_config()
        .context("Failed to load fleet configuration")?;
    if fleet_config.pools.is_empty() {
        anyhow::bail!("No pools configured: set FLEET_POOLS or pass --config");
    }

    // Database setup
    let db_path = &config.db_path;

    // Backup before migrations
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    // No wire client ships with the service; pools are simulated.
    let hypervisor: Arc<dyn HypervisorClient> =
        Arc::new(InMemoryHypervisor::with_demo_pools(fleet_config.pool_names()));
    info!(
        "Hypervisor backend: {} ({} pools)",
        hypervisor.name(),
        fleet_config.pools.len()
    );

    let fleet = Fleet::start(fleet_config, pool, hypervisor).await?;

    // Start janitor task
    tokio::spawn(start_janitor_task(fleet.clone()));

    let app = create_app(fleet.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    fleet.shutdown();
    info!("fleet-api stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
