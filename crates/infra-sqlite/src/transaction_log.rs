// SQLite TransactionLog Implementation

use async_trait::async_trait;
use pactum_core::domain::{LogRecord, RecordType};
use pactum_core::error::{AppError, Result};
use pactum_core::port::{TimeProvider, TransactionLog, UnresolvedTransaction};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::LogWrite(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::LogWrite(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::LogWrite(format!("Database full: {}", db_err.message())),
                    _ => AppError::LogWrite(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::LogWrite(format!("Database error: {}", db_err.message()))
            }
        }
        _ => AppError::LogWrite(format!("Database error: {}", err)),
    }
}

/// SQLite-backed append-only transaction log.
///
/// Sequence numbers are assigned inside a database transaction, so
/// concurrent appends for the same tx_id serialize on the primary key
/// instead of racing.
pub struct SqliteTransactionLog {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteTransactionLog {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LogRecord> {
        let record_type_str: String = row.get("record_type");
        let record_type = RecordType::from_str(&record_type_str)
            .map_err(|e| AppError::Internal(format!("Corrupt log record: {}", e)))?;
        let payload_str: String = row.get("payload");
        let payload = serde_json::from_str(&payload_str)?;

        Ok(LogRecord {
            tx_id: row.get("tx_id"),
            sequence_no: row.get::<i64, _>("sequence_no"),
            record_type,
            payload,
            logged_at: row.get("logged_at"),
        })
    }
}

#[async_trait]
impl TransactionLog for SqliteTransactionLog {
    async fn append(
        &self,
        tx_id: &str,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<LogRecord> {
        let logged_at = self.time_provider.now_millis();
        let payload_str = serde_json::to_string(&payload)?;

        let mut db_tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let sequence_no: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_no), 0) + 1 FROM tx_log WHERE tx_id = ?",
        )
        .bind(tx_id)
        .fetch_one(&mut *db_tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO tx_log (tx_id, sequence_no, record_type, payload, logged_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx_id)
        .bind(sequence_no)
        .bind(record_type.to_string())
        .bind(&payload_str)
        .bind(logged_at)
        .execute(&mut *db_tx)
        .await
        .map_err(map_sqlx_error)?;

        db_tx.commit().await.map_err(map_sqlx_error)?;

        Ok(LogRecord {
            tx_id: tx_id.to_string(),
            sequence_no,
            record_type,
            payload,
            logged_at,
        })
    }

    async fn scan_unresolved(&self) -> Result<Vec<UnresolvedTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_id, sequence_no, record_type, payload, logged_at
            FROM tx_log
            WHERE tx_id NOT IN (
                SELECT DISTINCT tx_id FROM tx_log WHERE record_type = ?
            )
            ORDER BY tx_id, sequence_no
            "#,
        )
        .bind(RecordType::Terminal.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut unresolved: Vec<UnresolvedTransaction> = Vec::new();
        for row in &rows {
            let record = Self::row_to_record(row)?;
            match unresolved.last_mut() {
                Some(open) if open.tx_id == record.tx_id => open.records.push(record),
                _ => unresolved.push(UnresolvedTransaction {
                    tx_id: record.tx_id.clone(),
                    records: vec![record],
                }),
            }
        }
        Ok(unresolved)
    }
}
