// Pactum Infrastructure - SQLite Adapter
// Implements: TransactionLog, Maintenance

mod connection;
mod maintenance_impl;
mod migration;
mod transaction_log;

pub use connection::create_pool;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use transaction_log::SqliteTransactionLog;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
