// Maintenance Port (log archival and compaction)

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;

/// Log store statistics
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceStats {
    pub db_size_bytes: i64,
    pub db_size_mb: f64,
    pub record_count: i64,
    pub transaction_count: i64,
    pub resolved_transaction_count: i64,
    pub fragmentation_percent: f64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Resolved transactions older than this are archived out of the log
    pub resolved_retention_days: i64,
    /// Size threshold that triggers a warning in the maintenance cycle
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            resolved_retention_days: crate::application::constants::DEFAULT_RESOLVED_RETENTION_DAYS,
            max_db_size_mb: 1000.0,
        }
    }
}

/// Maintenance operations on the transaction log store
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Reclaim free pages. Returns MB reclaimed.
    async fn vacuum(&self) -> Result<f64>;

    /// Remove records of transactions that reached a clean terminal
    /// state (COMMITTED or ROLLED_BACK) more than `retention_days` ago.
    /// Unresolved and heuristic transactions are never touched; the
    /// latter stay until the operator reconciles them. Returns the
    /// number of transactions archived.
    async fn archive_resolved(&self, retention_days: i64) -> Result<i64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// One full maintenance cycle: archive then vacuum
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let archived = self.archive_resolved(config.resolved_retention_days).await?;
        let reclaimed_mb = self.vacuum().await?;
        let stats = self.get_stats().await?;

        tracing::info!(
            archived_transactions = archived,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats.db_size_mb,
            "Maintenance cycle complete"
        );

        if stats.db_size_mb > config.max_db_size_mb {
            tracing::warn!(
                db_size_mb = stats.db_size_mb,
                max_db_size_mb = config.max_db_size_mb,
                "Transaction log store exceeds configured size limit"
            );
        }

        Ok(stats)
    }
}
