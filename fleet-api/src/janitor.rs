use fleet_orchestrator::{Fleet, RecoveryReport};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Periodically fail operations stuck in Running and free their locks.
///
/// The fleet already swept once at startup, so the first sweep here happens
/// one interval later.
pub async fn start_janitor_task(fleet: Fleet) {
    let period = fleet.config().recovery_interval();
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    info!(
        "Janitor task running (sweeps every {} seconds)",
        period.as_secs()
    );

    loop {
        interval.tick().await;

        if let Err(e) = run_recovery(&fleet).await {
            error!("Recovery sweep failed: {}", e);
        }
    }
}

pub async fn run_recovery(fleet: &Fleet) -> anyhow::Result<RecoveryReport> {
    let report = fleet.recover().await?;

    for id in &report.interrupted {
        info!("Operation {} interrupted after exceeding the stale threshold", id);
    }

    Ok(report)
}
