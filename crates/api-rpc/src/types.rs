//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};

/// tx.begin.v1 - Start a transaction
#[derive(Debug, Default, Deserialize)]
pub struct BeginRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct BeginResponse {
    pub tx_id: String,
    pub phase: String,
}

/// tx.enlist.v1 - Enlist a resource manager
#[derive(Debug, Deserialize)]
pub struct EnlistRequest {
    pub tx_id: String,
    pub resource_manager_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnlistResponse {
    pub tx_id: String,
    pub branch_id: String,
    pub resource_manager_id: String,
}

/// tx.commit.v1 - Resolve the transaction
#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub tx_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitResponse {
    pub tx_id: String,
    pub outcome: String,
    /// True when the outcome needs operator attention
    pub heuristic: bool,
}

/// tx.rollback.v1 - Roll the transaction back
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub tx_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResponse {
    pub tx_id: String,
    pub outcome: String,
    pub heuristic: bool,
}

/// tx.status.v1 - Inspect an in-flight transaction
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub tx_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub tx_id: String,
    pub phase: String,
    pub branches: Vec<BranchEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchEntry {
    pub branch_id: String,
    pub resource_manager_id: String,
    pub vote: String,
    pub outcome: String,
}

/// admin.stats.v1 - Get coordinator statistics
#[derive(Debug, Default, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub in_flight_transactions: i64,
    pub logged_transactions: i64,
    pub resolved_transactions: i64,
    pub log_record_count: i64,
    pub db_size_bytes: i64,
    pub uptime_seconds: i64,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub force_vacuum: bool,
    /// Override for the archival retention window
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub transactions_archived: i64,
    pub db_size_before: i64,
    pub db_size_after: i64,
}
