//! berth scheduler binary.
//!
//! Loads configuration from the environment, opens the local state store,
//! recovers, then keeps a session with the cluster manager alive until
//! Ctrl-C. Failed sessions are retried with exponential backoff.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use berth_reconcile::BackoffPolicy;
use berth_scheduler::connector::{Connector, ConnectorConfig, HttpMasterDiscovery};
use berth_scheduler::store::SqliteStore;
use berth_scheduler::{Config, RunExit, Scheduler};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        masters = ?config.masters,
        framework = %config.framework_name,
        role = %config.framework_role,
        data_dir = %config.data_dir.display(),
        "Starting berth scheduler"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let store = SqliteStore::open(&config.state_db_path())
        .with_context(|| format!("opening state store {}", config.state_db_path().display()))?;

    let discovery = Arc::new(HttpMasterDiscovery::new()?);
    let session = berth_scheduler::connector::new_shared_session();
    let (connector, channels) =
        Connector::new(ConnectorConfig::from_config(&config), discovery, session)?;

    let mut scheduler = Scheduler::new(config, Arc::new(store), connector, channels);
    let handle = scheduler.handle();

    let report = scheduler.recover().context("recovering scheduler state")?;
    info!(apps = report.apps, pending = report.pending, "Recovery complete");

    tokio::spawn({
        let handle = handle.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Received shutdown signal");
            handle.stop();
        }
    });

    let backoff = BackoffPolicy::default();
    let mut attempt = 0u32;
    loop {
        scheduler.start_session()?;
        let started = Instant::now();
        match scheduler.run().await {
            RunExit::Stopped => break,
            RunExit::SessionFailed(e) => {
                // A session that stayed up past the longest delay was healthy.
                if started.elapsed() > backoff.max {
                    attempt = 0;
                }
                let delay = backoff.delay(attempt);
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Session ended; reconnecting");
                attempt = attempt.saturating_add(1);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = handle.stopped() => break,
                }
            }
        }
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
