// Coordinator Service
//
// Drives each transaction through the two-phase protocol. The durable
// ordering is fixed: the vote set and the decision are in the log
// before any phase-2 verb is sent. A decision that is not durable is
// no decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::domain::{
    BranchId, BranchOutcome, BranchVote, Decision, DecisionPayload, RecordType, TerminalPayload,
    TxId, TxOutcome, TxPhase, VotesPayload, Vote,
};
use crate::error::AppError;
use crate::port::{IdProvider, ResourceManagerHandle, TimeProvider, TransactionLog};
use crate::Result;

use super::backoff::BackoffPolicy;
use super::constants;
use super::context::TransactionContext;
use super::phases;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub prepare_timeout: Duration,
    pub phase_two_timeout: Duration,
    pub phase_two_attempts: u32,
    pub resolve_query_attempts: u32,
    pub participant_retry_base_delay_ms: u64,
    pub log_append_attempts: u32,
    pub log_append_base_delay_ms: u64,
    pub forget_timeout: Duration,
    pub cancel_wait_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: constants::DEFAULT_PREPARE_TIMEOUT,
            phase_two_timeout: constants::DEFAULT_PHASE_TWO_TIMEOUT,
            phase_two_attempts: constants::PHASE_TWO_ATTEMPTS,
            resolve_query_attempts: constants::RESOLVE_QUERY_ATTEMPTS,
            participant_retry_base_delay_ms: constants::PARTICIPANT_RETRY_BASE_DELAY_MS,
            log_append_attempts: constants::LOG_APPEND_ATTEMPTS,
            log_append_base_delay_ms: constants::LOG_APPEND_BASE_DELAY_MS,
            forget_timeout: constants::FORGET_TIMEOUT,
            cancel_wait_timeout: constants::CANCEL_WAIT_TIMEOUT,
        }
    }
}

/// Point-in-time view of a transaction for the status API
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub tx_id: TxId,
    pub phase: TxPhase,
    pub branches: Vec<BranchSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchSnapshot {
    pub branch_id: BranchId,
    pub resource_manager_id: String,
    pub vote: Vote,
    pub outcome: BranchOutcome,
}

/// One in-flight transaction. The context mutex is held for the whole
/// resolution run, so a concurrent client rollback signals through the
/// cancel flag and waits on the watch channel instead.
struct TxSlot {
    ctx: Mutex<TransactionContext>,
    cancel: AtomicBool,
    done: watch::Sender<Option<TxOutcome>>,
}

pub struct CoordinatorService {
    log: Arc<dyn TransactionLog>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: CoordinatorConfig,
    resource_managers: RwLock<HashMap<String, Arc<dyn ResourceManagerHandle>>>,
    transactions: RwLock<HashMap<TxId, Arc<TxSlot>>>,
}

impl CoordinatorService {
    pub fn new(
        log: Arc<dyn TransactionLog>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            log,
            id_provider,
            time_provider,
            config,
            resource_managers: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Make a participant available for enlistment under its id
    pub async fn register_resource_manager(&self, handle: Arc<dyn ResourceManagerHandle>) {
        let id = handle.resource_manager_id().to_string();
        info!(resource_manager_id = %id, "Resource manager registered");
        self.resource_managers.write().await.insert(id, handle);
    }

    /// Snapshot of all registered participants (used by recovery)
    pub async fn resource_managers(&self) -> HashMap<String, Arc<dyn ResourceManagerHandle>> {
        self.resource_managers.read().await.clone()
    }

    /// Start a new transaction. The CREATED record is durable before
    /// the transaction id is handed out.
    pub async fn begin(&self) -> Result<TxId> {
        let tx_id = self.id_provider.generate_id();
        let now = self.time_provider.now_millis();

        self.append_with_retry(
            &tx_id,
            RecordType::Created,
            serde_json::json!({ "created_at": now }),
        )
        .await?;

        let tx = crate::domain::Transaction::new(tx_id.clone(), now);
        let (done, _) = watch::channel(None);
        let slot = Arc::new(TxSlot {
            ctx: Mutex::new(TransactionContext::new(tx)),
            cancel: AtomicBool::new(false),
            done,
        });
        self.transactions.write().await.insert(tx_id.clone(), slot);

        info!(tx_id = %tx_id, "Transaction started");
        Ok(tx_id)
    }

    /// Enlist a registered participant in an active transaction
    pub async fn enlist(&self, tx_id: &str, resource_manager_id: &str) -> Result<BranchId> {
        let slot = self.slot(tx_id).await?;
        let handle = self
            .resource_managers
            .read()
            .await
            .get(resource_manager_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Resource manager not registered: {}",
                    resource_manager_id
                ))
            })?;

        let mut ctx = slot.ctx.lock().await;
        let branch_id = ctx.enlist(handle)?;
        info!(
            tx_id = %tx_id,
            branch_id = %branch_id,
            resource_manager_id = %resource_manager_id,
            "Branch enlisted"
        );
        Ok(branch_id)
    }

    /// Resolve the transaction: run both phases and return the global
    /// outcome. A heuristic outcome is still an outcome, not an error.
    pub async fn commit(&self, tx_id: &str) -> Result<TxOutcome> {
        let slot = self.slot(tx_id).await?;
        let mut ctx = slot.ctx.lock().await;

        if ctx.phase() != TxPhase::Active {
            return Err(AppError::InvalidState(format!(
                "Transaction {} is {}, not ACTIVE",
                tx_id,
                ctx.phase()
            )));
        }

        ctx.advance(TxPhase::Preparing)?;
        let plans = ctx.branch_plans();
        info!(tx_id = %tx_id, branches = plans.len(), "Prepare round starting");

        let votes = phases::run_prepare_round(&plans, self.config.prepare_timeout).await;
        for (branch_id, vote) in &votes {
            ctx.mark_vote(branch_id, *vote)?;
        }

        let cancelled = slot.cancel.load(Ordering::SeqCst);
        let decision = if ctx.transaction().all_voted_yes() && !cancelled {
            Decision::Commit
        } else {
            Decision::Rollback
        };
        if cancelled {
            info!(tx_id = %tx_id, "Client rollback received during prepare, deciding rollback");
        }

        // Durability barrier: votes and decision hit the log before any
        // phase-2 verb goes out.
        self.append_with_retry(tx_id, RecordType::Votes, self.votes_payload(&ctx)?)
            .await?;

        match decision {
            Decision::Commit => {
                ctx.advance(TxPhase::Prepared)?;
                self.append_with_retry(
                    tx_id,
                    RecordType::Decision,
                    serde_json::to_value(DecisionPayload { decision })?,
                )
                .await?;
                ctx.advance(TxPhase::Committing)?;
            }
            Decision::Rollback => {
                self.append_with_retry(
                    tx_id,
                    RecordType::Decision,
                    serde_json::to_value(DecisionPayload { decision })?,
                )
                .await?;
                ctx.advance(TxPhase::RollingBack)?;
            }
        }

        info!(tx_id = %tx_id, decision = %decision, "Decision durable, executing phase 2");
        let outcome = self.execute_phase_two(&slot, &mut ctx, decision).await?;
        drop(ctx);

        self.transactions.write().await.remove(tx_id);
        Ok(outcome)
    }

    /// Roll the transaction back on client request.
    ///
    /// Before the prepare round this unwinds locally. During the
    /// prepare round it flags cancellation and waits for the outcome.
    /// From COMMITTING on the decision is durable and the request is
    /// rejected.
    pub async fn rollback(&self, tx_id: &str) -> Result<TxOutcome> {
        let slot = self.slot(tx_id).await?;

        let mut ctx = match slot.ctx.try_lock() {
            Ok(ctx) => ctx,
            Err(_) => {
                // Resolution is in flight. The cancel flag is honored
                // until the decision record is written.
                slot.cancel.store(true, Ordering::SeqCst);
                info!(tx_id = %tx_id, "Rollback requested while resolution in flight");
                return self.await_outcome(tx_id, &slot).await;
            }
        };

        if ctx.phase() != TxPhase::Active {
            return Err(AppError::InvalidState(format!(
                "Transaction {} is {}, rollback window has closed",
                tx_id,
                ctx.phase()
            )));
        }

        info!(tx_id = %tx_id, "Client rollback before prepare, unwinding locally");
        ctx.advance(TxPhase::RollingBack)?;
        // No participant holds prepared state yet; nothing to send.
        for branch_id in ctx
            .branches()
            .iter()
            .map(|b| b.branch_id.clone())
            .collect::<Vec<_>>()
        {
            ctx.mark_outcome(&branch_id, BranchOutcome::RolledBack)?;
        }
        self.append_with_retry(
            tx_id,
            RecordType::Decision,
            serde_json::to_value(DecisionPayload {
                decision: Decision::Rollback,
            })?,
        )
        .await?;

        let outcome = TxOutcome::RolledBack;
        ctx.transaction_mut()
            .finish(outcome, self.time_provider.now_millis())?;
        self.append_terminal(tx_id, outcome).await;
        let _ = slot.done.send(Some(outcome));
        drop(ctx);

        self.transactions.write().await.remove(tx_id);
        info!(tx_id = %tx_id, outcome = %outcome, "Transaction resolved");
        Ok(outcome)
    }

    /// Current view of an in-flight transaction
    pub async fn status(&self, tx_id: &str) -> Result<TransactionSnapshot> {
        let slot = self.slot(tx_id).await?;
        let ctx = slot.ctx.try_lock().map_err(|_| {
            AppError::Conflict(format!("Transaction {} is being resolved", tx_id))
        })?;

        let tx = ctx.transaction();
        Ok(TransactionSnapshot {
            tx_id: tx.id.clone(),
            phase: tx.phase,
            branches: tx
                .branches
                .iter()
                .map(|b| BranchSnapshot {
                    branch_id: b.branch_id.clone(),
                    resource_manager_id: b.resource_manager_id.clone(),
                    vote: b.vote,
                    outcome: b.outcome,
                })
                .collect(),
        })
    }

    pub async fn in_flight_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    // Phase 2 plus the terminal bookkeeping. The decision is already
    // durable when this runs.
    async fn execute_phase_two(
        &self,
        slot: &Arc<TxSlot>,
        ctx: &mut TransactionContext,
        decision: Decision,
    ) -> Result<TxOutcome> {
        let tx_id = ctx.tx_id().to_string();
        let plans = ctx.branch_plans();

        let outcomes = phases::run_phase_two(&tx_id, decision, &plans, &self.config).await;
        for (branch_id, outcome) in &outcomes {
            ctx.mark_outcome(branch_id, *outcome)?;
        }

        let outcome = ctx.transaction().global_outcome(decision);
        ctx.transaction_mut()
            .finish(outcome, self.time_provider.now_millis())?;
        self.append_terminal(&tx_id, outcome).await;

        if outcome.is_heuristic() {
            error!(
                tx_id = %tx_id,
                outcome = %outcome,
                "Transaction resolved heuristically, operator attention required"
            );
        } else {
            phases::forget_all(&tx_id, &plans, self.config.forget_timeout).await;
            info!(tx_id = %tx_id, outcome = %outcome, "Transaction resolved");
        }

        let _ = slot.done.send(Some(outcome));
        Ok(outcome)
    }

    async fn await_outcome(&self, tx_id: &str, slot: &Arc<TxSlot>) -> Result<TxOutcome> {
        let mut rx = slot.done.subscribe();
        let wait = async {
            loop {
                if let Some(outcome) = *rx.borrow_and_update() {
                    return Ok(outcome);
                }
                if rx.changed().await.is_err() {
                    return Err(AppError::Internal(
                        "Transaction resolution abandoned".to_string(),
                    ));
                }
            }
        };

        match tokio::time::timeout(self.config.cancel_wait_timeout, wait).await {
            Ok(Ok(TxOutcome::Committed)) => Err(AppError::InvalidState(format!(
                "Transaction {} already committed, rollback refused",
                tx_id
            ))),
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Conflict(format!(
                "Transaction {} still resolving, retry later",
                tx_id
            ))),
        }
    }

    fn votes_payload(&self, ctx: &TransactionContext) -> Result<serde_json::Value> {
        let payload = VotesPayload {
            branches: ctx
                .branches()
                .iter()
                .map(|b| BranchVote {
                    branch_id: b.branch_id.clone(),
                    resource_manager_id: b.resource_manager_id.clone(),
                    vote: b.vote,
                })
                .collect(),
        };
        Ok(serde_json::to_value(payload)?)
    }

    /// Append with bounded retries. Exhaustion is surfaced as a write
    /// failure after an operator alarm; the coordinator never proceeds
    /// to phase 2 on a record it could not make durable.
    async fn append_with_retry(
        &self,
        tx_id: &str,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<()> {
        let backoff = BackoffPolicy::new(self.config.log_append_base_delay_ms);
        let mut last_err = None;

        for attempt in 1..=self.config.log_append_attempts {
            match self.log.append(tx_id, record_type, payload.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        tx_id = %tx_id,
                        record_type = %record_type,
                        attempt = attempt,
                        error = %e,
                        "Log append failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < self.config.log_append_attempts {
                tokio::time::sleep(backoff.delay_for(tx_id, attempt)).await;
            }
        }

        error!(
            tx_id = %tx_id,
            record_type = %record_type,
            attempts = self.config.log_append_attempts,
            "Transaction log unavailable, operator attention required"
        );
        Err(last_err.unwrap_or_else(|| AppError::LogWrite("log append failed".to_string())))
    }

    // Terminal record failure does not change the outcome; the branches
    // are already resolved. Recovery will re-derive the same terminal
    // state from the decision record.
    async fn append_terminal(&self, tx_id: &str, outcome: TxOutcome) {
        let payload = match serde_json::to_value(TerminalPayload { outcome }) {
            Ok(p) => p,
            Err(e) => {
                error!(tx_id = %tx_id, error = %e, "Terminal payload serialization failed");
                return;
            }
        };
        if let Err(e) = self
            .append_with_retry(tx_id, RecordType::Terminal, payload)
            .await
        {
            error!(
                tx_id = %tx_id,
                error = %e,
                "Terminal record not durable, recovery will re-resolve this transaction"
            );
        }
    }

    async fn slot(&self, tx_id: &str) -> Result<Arc<TxSlot>> {
        self.transactions
            .read()
            .await
            .get(tx_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown transaction: {}", tx_id)))
    }
}
