// Recovery Service
//
// On startup, re-resolves every transaction the log shows as
// unresolved. Recovery trusts only the log: a transaction with no
// durable vote set is presumed aborted, a durable decision is re-driven
// to every branch it names.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{
    combine_outcomes, Decision, DecisionPayload, RecordType, TerminalPayload, TxOutcome, Vote,
    VotesPayload,
};
use crate::port::{ResourceManagerHandle, TransactionLog, UnresolvedTransaction};
use crate::Result;

use super::backoff::BackoffPolicy;
use super::coordinator::CoordinatorConfig;
use super::phases::{self, BranchPlan};

pub struct RecoveryService {
    log: Arc<dyn TransactionLog>,
    resource_managers: HashMap<String, Arc<dyn ResourceManagerHandle>>,
    config: CoordinatorConfig,
}

impl RecoveryService {
    pub fn new(
        log: Arc<dyn TransactionLog>,
        resource_managers: HashMap<String, Arc<dyn ResourceManagerHandle>>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            log,
            resource_managers,
            config,
        }
    }

    /// Scan the log and resolve every in-doubt transaction. Returns the
    /// number actually resolved; skipped transactions stay unresolved
    /// for the next run.
    pub async fn recover(&self) -> Result<usize> {
        let unresolved = self.log.scan_unresolved().await?;
        if unresolved.is_empty() {
            info!("No unresolved transactions in log");
            return Ok(0);
        }

        info!(
            count = unresolved.len(),
            "Found unresolved transactions, starting recovery"
        );

        let mut resolved = 0;
        for tx in &unresolved {
            match self.recover_single(tx).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(tx_id = %tx.tx_id, error = %e, "Recovery failed for transaction");
                }
            }
        }

        info!(
            resolved = resolved,
            skipped = unresolved.len() - resolved,
            "Recovery pass complete"
        );
        Ok(resolved)
    }

    /// Resolve one in-doubt transaction. Ok(false) means it was
    /// deliberately skipped, not resolved.
    async fn recover_single(&self, unresolved: &UnresolvedTransaction) -> Result<bool> {
        let tx_id = &unresolved.tx_id;

        let votes = self.find_payload::<VotesPayload>(unresolved, RecordType::Votes)?;
        let logged_decision =
            self.find_payload::<DecisionPayload>(unresolved, RecordType::Decision)?;

        // No durable vote set: the crash hit before the prepare round
        // finished. Presumed abort; participants that did prepare will
        // resolve themselves by asking us and finding no decision.
        let Some(votes) = votes else {
            info!(tx_id = %tx_id, "No vote set in log, presumed abort");
            if logged_decision.is_none() {
                self.append_decision(tx_id, Decision::Rollback).await?;
            }
            self.append_terminal(tx_id, TxOutcome::RolledBack).await?;
            return Ok(true);
        };

        // A missing decision record is re-derived from the votes the
        // same way the live path derives it.
        let decision = match logged_decision {
            Some(p) => p.decision,
            None => {
                let all_yes = votes.branches.iter().all(|b| b.vote == Vote::Yes);
                let derived = if all_yes {
                    Decision::Commit
                } else {
                    Decision::Rollback
                };
                self.append_decision(tx_id, derived).await?;
                derived
            }
        };

        // Every branch needs its participant handle; with any of them
        // unregistered the transaction stays in doubt rather than being
        // half-driven.
        let mut plans = Vec::with_capacity(votes.branches.len());
        for bv in &votes.branches {
            match self.resource_managers.get(&bv.resource_manager_id) {
                Some(handle) => plans.push(BranchPlan {
                    branch_id: bv.branch_id.clone(),
                    resource_manager_id: bv.resource_manager_id.clone(),
                    vote: bv.vote,
                    handle: handle.clone(),
                }),
                None => {
                    warn!(
                        tx_id = %tx_id,
                        resource_manager_id = %bv.resource_manager_id,
                        "Participant not registered, leaving transaction unresolved"
                    );
                    return Ok(false);
                }
            }
        }

        info!(
            tx_id = %tx_id,
            decision = %decision,
            branches = plans.len(),
            "Re-driving phase 2 from durable decision"
        );

        let branch_outcomes = phases::run_phase_two(tx_id, decision, &plans, &self.config).await;
        let outcome = combine_outcomes(decision, branch_outcomes.iter().map(|(_, o)| *o));
        self.append_terminal(tx_id, outcome).await?;

        if outcome.is_heuristic() {
            error!(
                tx_id = %tx_id,
                outcome = %outcome,
                "Recovered transaction resolved heuristically, operator attention required"
            );
        } else {
            phases::forget_all(tx_id, &plans, self.config.forget_timeout).await;
            info!(tx_id = %tx_id, outcome = %outcome, "Transaction recovered");
        }
        Ok(true)
    }

    fn find_payload<T: serde::de::DeserializeOwned>(
        &self,
        unresolved: &UnresolvedTransaction,
        record_type: RecordType,
    ) -> Result<Option<T>> {
        unresolved
            .records
            .iter()
            .find(|r| r.record_type == record_type)
            .map(|r| serde_json::from_value(r.payload.clone()).map_err(Into::into))
            .transpose()
    }

    async fn append_decision(&self, tx_id: &str, decision: Decision) -> Result<()> {
        self.append_with_retry(
            tx_id,
            RecordType::Decision,
            serde_json::to_value(DecisionPayload { decision })?,
        )
        .await
    }

    async fn append_terminal(&self, tx_id: &str, outcome: TxOutcome) -> Result<()> {
        self.append_with_retry(
            tx_id,
            RecordType::Terminal,
            serde_json::to_value(TerminalPayload { outcome })?,
        )
        .await
    }

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
                        "Log append failed during recovery"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < self.config.log_append_attempts {
                tokio::time::sleep(backoff.delay_for(tx_id, attempt)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| crate::error::AppError::LogWrite("log append failed".to_string())))
    }
}
