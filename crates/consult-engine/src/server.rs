//! Server wrapper managing engine lifecycle.
//!
//! [`ConsultCenterServer`] owns the engine plus the role-scoped API
//! facades and runs a periodic monitoring loop that logs a status
//! summary. Build one through [`ConsultCenterServerBuilder`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::api::{AdminApi, SupervisorApi};
use crate::config::ConsultCenterConfig;
use crate::engine::ConsultEngine;
use crate::error::{EngineError, Result};

/// Consultation center server
pub struct ConsultCenterServer {
    config: ConsultCenterConfig,
    engine: Arc<ConsultEngine>,
    admin_api: AdminApi,
    supervisor_api: SupervisorApi,
    monitor_handle: Option<JoinHandle<()>>,
}

impl ConsultCenterServer {
    pub async fn new(config: ConsultCenterConfig) -> Result<Self> {
        let engine = ConsultEngine::new(config.clone()).await?;
        Ok(Self {
            config,
            admin_api: AdminApi::new(engine.clone()),
            supervisor_api: SupervisorApi::new(engine.clone()),
            engine,
            monitor_handle: None,
        })
    }

    /// Start the background monitoring loop
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "🚀 Consultation center '{}' starting",
            self.config.general.service_name
        );

        let engine = self.engine.clone();
        let period = Duration::from_secs(self.config.general.monitor_interval_secs.max(1));
        self.monitor_handle = Some(tokio::spawn(async move {
            Self::monitor_loop(engine, period).await;
        }));

        info!("✅ Consultation center started");
        Ok(())
    }

    /// Stop the monitoring loop
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping consultation center...");
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
        info!("✅ Consultation center stopped");
        Ok(())
    }

    /// Keep the server alive until ctrl-c
    pub async fn run(&self) -> Result<()> {
        info!("🏢 Consultation center is running");
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| EngineError::Configuration(format!("signal handler: {e}")))?;
        info!("🛑 Shutdown signal received");
        Ok(())
    }

    pub fn admin_api(&self) -> &AdminApi {
        &self.admin_api
    }

    pub fn supervisor_api(&self) -> &SupervisorApi {
        &self.supervisor_api
    }

    pub fn engine(&self) -> &Arc<ConsultEngine> {
        &self.engine
    }

    async fn monitor_loop(engine: Arc<ConsultEngine>, period: Duration) {
        info!("👀 Starting status monitor");
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;

            match engine.stats().overview(None, None).await {
                Ok(overview) => {
                    info!("📊 === Consultation Status Update ===");
                    info!("  ⏳ Pending: {}", overview.counts.pending);
                    info!("  🔄 Processing: {}", overview.counts.processing);
                    info!("  ✅ Completed: {}", overview.counts.completed);
                    info!("  🚫 Cancelled: {}", overview.counts.cancelled);
                    info!("  📋 Total: {}", overview.total);
                }
                Err(err) => warn!(%err, "status overview unavailable"),
            }

            match engine.stats().workload_distribution().await {
                Ok(buckets) => {
                    info!("👥 Advisor Workload Summary:");
                    for bucket in buckets {
                        info!("  {} advisors: {}", bucket.tier, bucket.advisor_count);
                    }
                }
                Err(err) => warn!(%err, "workload summary unavailable"),
            }
            info!("================================");
        }
    }
}

impl Drop for ConsultCenterServer {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
    }
}

/// Builder for [`ConsultCenterServer`]
pub struct ConsultCenterServerBuilder {
    config: ConsultCenterConfig,
}

impl ConsultCenterServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ConsultCenterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsultCenterConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist to a SQLite database at `path`
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.config.database.database_path = Some(path.into());
        self
    }

    /// Keep all state in memory (tests, demos)
    pub fn with_in_memory_store(mut self) -> Self {
        self.config.database.database_path = None;
        self
    }

    pub async fn build(self) -> Result<ConsultCenterServer> {
        ConsultCenterServer::new(self.config).await
    }
}

impl Default for ConsultCenterServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
