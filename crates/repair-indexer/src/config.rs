use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub progress_file: PathBuf,
    /// Overrides the node address from the progress file
    pub rpc_url: Option<String>,
    pub block_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// Keep running windows until the floor is reached instead of one per invocation
    pub repair_until_complete: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DB_MAX_CONNECTIONS")?,
            progress_file: env::var("PROGRESS_FILE")
                .unwrap_or_else(|_| "config.json".to_string())
                .into(),
            rpc_url: env::var("RPC_URL").ok().filter(|url| !url.is_empty()),
            block_delay_ms: env::var("BLOCK_DELAY_MS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid BLOCK_DELAY_MS")?,
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid RETRY_DELAY_MS")?,
            repair_until_complete: env::var("REPAIR_UNTIL_COMPLETE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid REPAIR_UNTIL_COMPLETE")?,
        })
    }
}
