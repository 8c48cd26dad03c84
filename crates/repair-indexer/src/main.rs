use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-record progress lines: info normally, debug when the run is `quiet`
macro_rules! progress {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            tracing::debug!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}

mod buffer;
mod classify;
mod config;
mod normalize;
mod progress;
mod repair;
mod rpc;
mod store;
#[cfg(test)]
mod testing;
mod transfer;

use progress::{FileProgressStore, ProgressStore};
use repair_common::RepairError;
use repair::{RepairOutcome, Repairer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "repair_indexer=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting repair indexer");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    let progress_store = FileProgressStore::new(&config.progress_file);
    let mut state = progress_store.load().await?;
    state.validate()?;

    let node_url = config.rpc_url.clone().unwrap_or_else(|| state.node_url());
    tracing::info!(
        "Node {}, blocks {} down to {}, {} per window",
        node_url,
        state.sync_block,
        state.start_block,
        state.repair_patch
    );
    let node = loop {
        match rpc::connect(&node_url).await {
            Ok(node) => break node,
            Err(RepairError::Rpc(e)) => {
                tracing::warn!("Node unavailable, retrying in {} ms: {}", config.retry_delay_ms, e);
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    // Create database pool
    let pool = repair_common::db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations");
    repair_common::db::run_migrations(&pool).await?;

    let store = Arc::new(store::PgStore::new(pool));
    let repairer = Repairer::new(node, store, Duration::from_millis(config.block_delay_ms));

    loop {
        match repairer.run_repair(&mut state, &progress_store, None).await {
            Ok(RepairOutcome::AwaitingConnection) => {
                tracing::info!("Retrying in {} ms", config.retry_delay_ms);
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            Ok(RepairOutcome::RangeComplete) => break,
            Ok(RepairOutcome::WindowComplete { .. }) => {
                if !config.repair_until_complete {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Repair aborted: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    tracing::info!("Repair indexer finished");
    Ok(())
}
