// Server configuration
// Decision: DATABASE_URL is optional; without it state lives in memory

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use linkeval_scheduler::SchedulerConfig;

/// Configuration for the ingestion server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string for durable scheduler state
    pub database_url: Option<String>,
    /// Endpoint that creates destination evaluation workflows
    pub workflow_trigger_url: String,
    /// Per-request timeout for the workflow endpoint
    pub trigger_timeout: Duration,
    /// Scheduler settings
    pub scheduler: SchedulerConfig,
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// - `LISTEN_ADDR` (default "0.0.0.0:9300")
    /// - `DATABASE_URL` (optional)
    /// - `WORKFLOW_TRIGGER_URL` (required)
    /// - `WORKFLOW_TRIGGER_TIMEOUT_SECS` (default 10)
    /// - plus everything read by [`SchedulerConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9300".to_string())
            .parse()
            .context("LISTEN_ADDR must be a socket address")?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let workflow_trigger_url = std::env::var("WORKFLOW_TRIGGER_URL")
            .context("WORKFLOW_TRIGGER_URL must be set")?;

        let trigger_timeout = std::env::var("WORKFLOW_TRIGGER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        Ok(Self {
            listen_addr,
            database_url,
            workflow_trigger_url,
            trigger_timeout,
            scheduler: SchedulerConfig::from_env(),
        })
    }
}
