// Transaction Log Port (durable decision record)

use async_trait::async_trait;

use crate::domain::{LogRecord, RecordType, TxId};
use crate::Result;

/// An unresolved transaction found during a startup scan: every log
/// record for a transaction with no TERMINAL record, in sequence order.
#[derive(Debug, Clone)]
pub struct UnresolvedTransaction {
    pub tx_id: TxId,
    pub records: Vec<LogRecord>,
}

/// Transaction Log trait
///
/// Append-only. The log assigns per-transaction sequence numbers; a
/// record is only considered written once `append` returns Ok.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Durably append a record for the transaction. Returns the record
    /// as written, including its log-assigned sequence number.
    async fn append(
        &self,
        tx_id: &str,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<LogRecord>;

    /// All transactions that have at least one record but no TERMINAL
    /// record. Used by recovery on startup.
    async fn scan_unresolved(&self) -> Result<Vec<UnresolvedTransaction>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory append-only log for unit tests
    pub struct InMemoryTransactionLog {
        records: Mutex<Vec<LogRecord>>,
        /// When > 0, the next N appends fail (decremented per failure)
        fail_next_appends: AtomicU32,
    }

    impl InMemoryTransactionLog {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_next_appends: AtomicU32::new(0),
            }
        }

        /// Make the next `n` append calls fail with a write error
        pub fn fail_next_appends(&self, n: u32) {
            self.fail_next_appends.store(n, Ordering::SeqCst);
        }

        pub fn records_for(&self, tx_id: &str) -> Vec<LogRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.tx_id == tx_id)
                .cloned()
                .collect()
        }

        /// Record types logged for a transaction, in append order
        pub fn record_types_for(&self, tx_id: &str) -> Vec<RecordType> {
            self.records_for(tx_id).iter().map(|r| r.record_type).collect()
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl Default for InMemoryTransactionLog {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TransactionLog for InMemoryTransactionLog {
        async fn append(
            &self,
            tx_id: &str,
            record_type: RecordType,
            payload: serde_json::Value,
        ) -> Result<LogRecord> {
            let pending = self.fail_next_appends.load(Ordering::SeqCst);
            if pending > 0 {
                self.fail_next_appends.store(pending - 1, Ordering::SeqCst);
                return Err(AppError::LogWrite("injected append failure".to_string()));
            }

            let mut records = self.records.lock().unwrap();
            let sequence_no = records.iter().filter(|r| r.tx_id == tx_id).count() as i64 + 1;
            let record = LogRecord {
                tx_id: tx_id.to_string(),
                sequence_no,
                record_type,
                payload,
                logged_at: chrono::Utc::now().timestamp_millis(),
            };
            records.push(record.clone());
            Ok(record)
        }

        async fn scan_unresolved(&self) -> Result<Vec<UnresolvedTransaction>> {
            let records = self.records.lock().unwrap();
            let mut order: Vec<TxId> = Vec::new();
            for r in records.iter() {
                if !order.contains(&r.tx_id) {
                    order.push(r.tx_id.clone());
                }
            }

            let mut unresolved = Vec::new();
            for tx_id in order {
                let tx_records: Vec<LogRecord> = records
                    .iter()
                    .filter(|r| r.tx_id == tx_id)
                    .cloned()
                    .collect();
                if tx_records
                    .iter()
                    .any(|r| r.record_type == RecordType::Terminal)
                {
                    continue;
                }
                unresolved.push(UnresolvedTransaction {
                    tx_id,
                    records: tx_records,
                });
            }
            Ok(unresolved)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_append_assigns_per_transaction_sequence() {
            let log = InMemoryTransactionLog::new();
            let r1 = log
                .append("tx-1", RecordType::Created, serde_json::json!({}))
                .await
                .unwrap();
            let r2 = log
                .append("tx-2", RecordType::Created, serde_json::json!({}))
                .await
                .unwrap();
            let r3 = log
                .append("tx-1", RecordType::Decision, serde_json::json!({}))
                .await
                .unwrap();

            assert_eq!(r1.sequence_no, 1);
            assert_eq!(r2.sequence_no, 1);
            assert_eq!(r3.sequence_no, 2);
        }

        #[tokio::test]
        async fn test_scan_skips_terminated_transactions() {
            let log = InMemoryTransactionLog::new();
            log.append("tx-open", RecordType::Created, serde_json::json!({}))
                .await
                .unwrap();
            log.append("tx-done", RecordType::Created, serde_json::json!({}))
                .await
                .unwrap();
            log.append("tx-done", RecordType::Terminal, serde_json::json!({}))
                .await
                .unwrap();

            let unresolved = log.scan_unresolved().await.unwrap();
            assert_eq!(unresolved.len(), 1);
            assert_eq!(unresolved[0].tx_id, "tx-open");
        }

        #[tokio::test]
        async fn test_injected_append_failure() {
            let log = InMemoryTransactionLog::new();
            log.fail_next_appends(1);
            let err = log
                .append("tx-1", RecordType::Created, serde_json::json!({}))
                .await;
            assert!(err.is_err());
            let ok = log
                .append("tx-1", RecordType::Created, serde_json::json!({}))
                .await;
            assert!(ok.is_ok());
        }
    }
}
