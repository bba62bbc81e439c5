// Maintenance Scheduler
//
// Runs periodic maintenance cycles (archive resolved transactions,
// reclaim space) until shutdown is signaled.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::port::{Maintenance, MaintenanceConfig};

use super::constants;
use super::shutdown::ShutdownToken;

pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(maintenance: Arc<dyn Maintenance>, config: MaintenanceConfig) -> Self {
        Self {
            maintenance,
            config,
            interval: Duration::from_secs(constants::DEFAULT_MAINTENANCE_INTERVAL_HOURS * 3600),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run cycles until shutdown. The first cycle runs after one full
    /// interval, not at startup; startup already has recovery to do.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_days = self.config.resolved_retention_days,
            "Maintenance scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.maintenance.run_full_maintenance(&self.config).await {
                        error!(error = %e, "Maintenance cycle failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Maintenance scheduler stopping");
                    return;
                }
            }
        }
    }
}
