//! verdant scheduler
//!
//! Long-running service that gates shoot admission and assigns a seed to
//! every shoot lacking one. The registry is served in process; admission
//! runs synchronously on its write path while the scheduler drains a
//! queue of shoot keys fed from the registry's watch stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verdant_registry::Registry;
use verdant_scheduler::admission::ShootValidator;
use verdant_scheduler::bootstrap;
use verdant_scheduler::config::Config;
use verdant_scheduler::controller::ShootScheduler;
use verdant_scheduler::indexers::Indexers;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting verdant scheduler");
    info!(
        strategy = %config.strategy,
        concurrent_syncs = config.concurrent_syncs,
        retry_sync_period_ms = config.retry_sync_period.as_millis() as u64,
        "Configuration loaded"
    );

    let registry = Arc::new(Registry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let indexers = Indexers::spawn(registry.clone(), shutdown_rx.clone());
    registry.set_shoot_admission(Arc::new(ShootValidator::new(indexers.clone())));

    if !indexers.wait_synced(Duration::from_secs(10)).await {
        anyhow::bail!("indexers did not sync within 10s");
    }

    // Load dev fixtures before serving, so they pass the same admission
    // path as live writes.
    if config.dev_mode {
        if let Some(path) = &config.state_file {
            bootstrap::load_state_file(&registry, &indexers, path).await?;
        }
    }

    let scheduler = ShootScheduler::new(registry, indexers, &config);
    let scheduler_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    info!("verdant scheduler stopped");
    Ok(())
}
