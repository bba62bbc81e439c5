// Log maintenance tests: archival must never touch an unresolved
// transaction, whatever its age.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pactum_core::domain::{RecordType, TxOutcome};
use pactum_core::port::{Maintenance, MaintenanceConfig, TimeProvider, TransactionLog};
use pactum_infra_sqlite::{create_pool, run_migrations, SqliteMaintenance, SqliteTransactionLog};

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const NOW: i64 = 1_700_000_000_000;

fn test_db_path() -> String {
    format!(
        "/tmp/pactum_maintenance_test_{}_{}.db",
        std::process::id(),
        DB_COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

fn cleanup(db_path: &str) {
    let _ = std::fs::remove_file(db_path);
    let _ = std::fs::remove_file(format!("{}-wal", db_path));
    let _ = std::fs::remove_file(format!("{}-shm", db_path));
}

struct FixedTime(i64);

impl TimeProvider for FixedTime {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

fn terminal(outcome: TxOutcome) -> serde_json::Value {
    serde_json::json!({ "outcome": outcome.to_string() })
}

#[tokio::test]
async fn test_full_maintenance_archives_old_and_keeps_in_doubt() {
    let db_path = test_db_path();
    let pool = create_pool(&db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();

    // Records logged a month ago.
    let old_log = SqliteTransactionLog::new(pool.clone(), Arc::new(FixedTime(NOW - 30 * DAY_MS)));
    old_log
        .append("tx-resolved", RecordType::Created, serde_json::json!({}))
        .await
        .unwrap();
    old_log
        .append("tx-resolved", RecordType::Terminal, terminal(TxOutcome::Committed))
        .await
        .unwrap();
    old_log
        .append("tx-in-doubt", RecordType::Created, serde_json::json!({}))
        .await
        .unwrap();
    old_log
        .append("tx-in-doubt", RecordType::Votes, serde_json::json!({}))
        .await
        .unwrap();

    // A freshly resolved transaction inside the retention window.
    let fresh_log = SqliteTransactionLog::new(pool.clone(), Arc::new(FixedTime(NOW)));
    fresh_log
        .append("tx-fresh", RecordType::Created, serde_json::json!({}))
        .await
        .unwrap();
    fresh_log
        .append("tx-fresh", RecordType::Terminal, terminal(TxOutcome::Committed))
        .await
        .unwrap();

    let maintenance = SqliteMaintenance::new(pool.clone(), Arc::new(FixedTime(NOW)));
    let stats = maintenance
        .run_full_maintenance(&MaintenanceConfig::default())
        .await
        .unwrap();

    // The month-old resolved transaction is gone; the in-doubt one and
    // the fresh one remain.
    assert_eq!(stats.transaction_count, 2);
    assert_eq!(stats.resolved_transaction_count, 1);

    let unresolved = fresh_log.scan_unresolved().await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].tx_id, "tx-in-doubt");
    assert_eq!(unresolved[0].records.len(), 2);

    cleanup(&db_path);
}

#[tokio::test]
async fn test_stats_reflect_log_contents() {
    let db_path = test_db_path();
    let pool = create_pool(&db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let log = SqliteTransactionLog::new(pool.clone(), Arc::new(FixedTime(NOW)));
    log.append("tx-1", RecordType::Created, serde_json::json!({}))
        .await
        .unwrap();
    log.append("tx-1", RecordType::Terminal, terminal(TxOutcome::Committed))
        .await
        .unwrap();
    log.append("tx-2", RecordType::Created, serde_json::json!({}))
        .await
        .unwrap();

    let maintenance = SqliteMaintenance::new(pool, Arc::new(FixedTime(NOW)));
    let stats = maintenance.get_stats().await.unwrap();

    assert_eq!(stats.record_count, 3);
    assert_eq!(stats.transaction_count, 2);
    assert_eq!(stats.resolved_transaction_count, 1);
    assert!(stats.db_size_bytes > 0);

    cleanup(&db_path);
}

#[tokio::test]
async fn test_vacuum_runs_and_reports_reclaimed_space() {
    let db_path = test_db_path();
    let pool = create_pool(&db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let log = SqliteTransactionLog::new(pool.clone(), Arc::new(FixedTime(NOW - 30 * DAY_MS)));
    for i in 0..50 {
        let tx_id = format!("tx-{}", i);
        log.append(&tx_id, RecordType::Created, serde_json::json!({"n": i}))
            .await
            .unwrap();
        log.append(&tx_id, RecordType::Terminal, terminal(TxOutcome::RolledBack))
            .await
            .unwrap();
    }

    let maintenance = SqliteMaintenance::new(pool, Arc::new(FixedTime(NOW)));
    let archived = maintenance.archive_resolved(7).await.unwrap();
    assert_eq!(archived, 50);

    let reclaimed = maintenance.vacuum().await.unwrap();
    assert!(reclaimed >= 0.0);

    cleanup(&db_path);
}
