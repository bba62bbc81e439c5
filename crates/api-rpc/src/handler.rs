//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{code, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    BeginRequest, BeginResponse, BranchEntry, CommitRequest, CommitResponse, EnlistRequest,
    EnlistResponse, MaintenanceRequest, MaintenanceResponse, RollbackRequest, RollbackResponse,
    StatsRequest, StatsResponse, StatusRequest, StatusResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use pactum_core::application::constants::DEFAULT_RESOLVED_RETENTION_DAYS;
use pactum_core::application::CoordinatorService;
use pactum_core::port::Maintenance;
use std::sync::Arc;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    coordinator: Arc<CoordinatorService>,
    maintenance: Arc<dyn Maintenance>,
    rate_limiter: Arc<RateLimiter>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(coordinator: Arc<CoordinatorService>, maintenance: Arc<dyn Maintenance>) -> Self {
        // Default: 200 burst, 100 req/sec (configurable via env)
        let max_burst: u32 = std::env::var("PACTUM_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        let rate_per_sec: u32 = std::env::var("PACTUM_RATE_LIMIT_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Self {
            coordinator,
            maintenance,
            rate_limiter: Arc::new(RateLimiter::new(max_burst, rate_per_sec)),
            start_time: std::time::Instant::now(),
        }
    }

    fn check_rate_limit(&self, allowed: bool) -> Result<(), ErrorObjectOwned> {
        if allowed {
            Ok(())
        } else {
            Err(ErrorObjectOwned::owned(
                code::THROTTLED,
                "Rate limit exceeded. Please slow down.",
                None::<()>,
            ))
        }
    }

    /// tx.begin.v1
    pub async fn begin(&self, _params: BeginRequest) -> Result<BeginResponse, ErrorObjectOwned> {
        self.check_rate_limit(self.rate_limiter.check().await)?;

        let tx_id = self.coordinator.begin().await.map_err(to_rpc_error)?;
        Ok(BeginResponse {
            tx_id,
            phase: "ACTIVE".to_string(),
        })
    }

    /// tx.enlist.v1
    pub async fn enlist(&self, params: EnlistRequest) -> Result<EnlistResponse, ErrorObjectOwned> {
        self.check_rate_limit(self.rate_limiter.check().await)?;

        let branch_id = self
            .coordinator
            .enlist(&params.tx_id, &params.resource_manager_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(EnlistResponse {
            tx_id: params.tx_id,
            branch_id,
            resource_manager_id: params.resource_manager_id,
        })
    }

    /// tx.commit.v1
    ///
    /// A heuristic outcome is a successful response, not an error: the
    /// transaction is resolved, the caller just has to know how.
    pub async fn commit(&self, params: CommitRequest) -> Result<CommitResponse, ErrorObjectOwned> {
        self.check_rate_limit(self.rate_limiter.check().await)?;

        let outcome = self
            .coordinator
            .commit(&params.tx_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(CommitResponse {
            tx_id: params.tx_id,
            outcome: outcome.to_string(),
            heuristic: outcome.is_heuristic(),
        })
    }

    /// tx.rollback.v1
    pub async fn rollback(
        &self,
        params: RollbackRequest,
    ) -> Result<RollbackResponse, ErrorObjectOwned> {
        self.check_rate_limit(self.rate_limiter.check().await)?;

        let outcome = self
            .coordinator
            .rollback(&params.tx_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(RollbackResponse {
            tx_id: params.tx_id,
            outcome: outcome.to_string(),
            heuristic: outcome.is_heuristic(),
        })
    }

    /// tx.status.v1
    pub async fn status(&self, params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let snapshot = self
            .coordinator
            .status(&params.tx_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(StatusResponse {
            tx_id: snapshot.tx_id,
            phase: snapshot.phase.to_string(),
            branches: snapshot
                .branches
                .into_iter()
                .map(|b| BranchEntry {
                    branch_id: b.branch_id,
                    resource_manager_id: b.resource_manager_id,
                    vote: b.vote.to_string(),
                    outcome: b.outcome.to_string(),
                })
                .collect(),
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let stats = self.maintenance.get_stats().await.map_err(to_rpc_error)?;
        let in_flight = self.coordinator.in_flight_count().await;

        Ok(StatsResponse {
            in_flight_transactions: in_flight as i64,
            logged_transactions: stats.transaction_count,
            resolved_transactions: stats.resolved_transaction_count,
            log_record_count: stats.record_count,
            db_size_bytes: stats.db_size_bytes,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ErrorObjectOwned> {
        let stats_before = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        let retention_days = params
            .retention_days
            .unwrap_or(DEFAULT_RESOLVED_RETENTION_DAYS);
        let transactions_archived = self
            .maintenance
            .archive_resolved(retention_days)
            .await
            .map_err(to_rpc_error)?;

        // Run VACUUM if forced or fragmented
        let vacuum_run = if params.force_vacuum || stats_before.fragmentation_percent > 10.0 {
            self.maintenance.vacuum().await.map_err(to_rpc_error)?;
            true
        } else {
            false
        };

        let stats_after = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        Ok(MaintenanceResponse {
            vacuum_run,
            transactions_archived,
            db_size_before: stats_before.db_size_bytes,
            db_size_after: stats_after.db_size_bytes,
        })
    }
}
