// SQLite Maintenance Implementation
use async_trait::async_trait;
use pactum_core::domain::{RecordType, TxOutcome};
use pactum_core::error::{AppError, Result};
use pactum_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Get DB file size in bytes
    async fn get_db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        Ok(page_count * page_size)
    }

    async fn get_db_size_mb(&self) -> Result<f64> {
        Ok(self.get_db_size_bytes().await? as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize transaction log store...");

        let size_before = self.get_db_size_mb().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.get_db_size_mb().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn archive_resolved(&self, retention_days: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let retention_ms = retention_days * 24 * 60 * 60 * 1000;
        let cutoff_time = now - retention_ms;

        info!(
            retention_days = retention_days,
            cutoff_time = cutoff_time,
            "Archiving resolved transactions"
        );

        // A transaction is archivable only through its TERMINAL record;
        // records of unresolved transactions never match this subquery.
        // Heuristic terminals are excluded as well: their branches were
        // never forgotten, and the operator needs the log to reconcile.
        let archivable: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT tx_id) FROM tx_log
            WHERE record_type = ? AND logged_at < ?
              AND json_extract(payload, '$.outcome') IN (?, ?)
            "#,
        )
        .bind(RecordType::Terminal.to_string())
        .bind(cutoff_time)
        .bind(TxOutcome::Committed.to_string())
        .bind(TxOutcome::RolledBack.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Archive count failed: {}", e)))?;

        let result = sqlx::query(
            r#"
            DELETE FROM tx_log
            WHERE tx_id IN (
                SELECT tx_id FROM tx_log
                WHERE record_type = ? AND logged_at < ?
                  AND json_extract(payload, '$.outcome') IN (?, ?)
            )
            "#,
        )
        .bind(RecordType::Terminal.to_string())
        .bind(cutoff_time)
        .bind(TxOutcome::Committed.to_string())
        .bind(TxOutcome::RolledBack.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Archive failed: {}", e)))?;

        info!(
            archived_transactions = archivable,
            deleted_records = result.rows_affected(),
            "Archive completed"
        );

        Ok(archivable)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.get_db_size_bytes().await?;

        let record_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tx_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to count records: {}", e)))?;

        let transaction_count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT tx_id) FROM tx_log")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to count transactions: {}", e)))?;

        let resolved_transaction_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT tx_id) FROM tx_log WHERE record_type = ?",
        )
        .bind(RecordType::Terminal.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to count resolved: {}", e)))?;

        let freelist_count: i64 = sqlx::query_scalar("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get freelist: {}", e)))?;
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let fragmentation_percent = if page_count > 0 {
            (freelist_count as f64 / page_count as f64) * 100.0
        } else {
            0.0
        };

        Ok(MaintenanceStats {
            db_size_bytes,
            db_size_mb: db_size_bytes as f64 / (1024.0 * 1024.0),
            record_count,
            transaction_count,
            resolved_transaction_count,
            fragmentation_percent,
        })
    }
}
