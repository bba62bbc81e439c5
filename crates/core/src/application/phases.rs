// Phase Execution
//
// Concurrent per-branch fan-out for both protocol phases. One slow or
// failed branch never blocks the others; each branch call is bound by
// its own timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::{BranchId, BranchOutcome, Decision, ResourceManagerId, Vote};
use crate::port::{BranchStatus, ParticipantError, PrepareVote, ResourceManagerHandle};

use super::backoff::BackoffPolicy;
use super::coordinator::CoordinatorConfig;

/// One branch's slice of a fan-out: identity, last known vote, and the
/// handle to talk to
pub struct BranchPlan {
    pub branch_id: BranchId,
    pub resource_manager_id: ResourceManagerId,
    pub vote: Vote,
    pub handle: Arc<dyn ResourceManagerHandle>,
}

/// Phase 1: send prepare to every branch concurrently.
///
/// An error or a local timeout yields Vote::Indeterminate, never
/// Vote::No. The participant may have prepared without the answer
/// arriving, so the branch cannot be treated as a refusal.
pub async fn run_prepare_round(
    plans: &[BranchPlan],
    prepare_timeout: Duration,
) -> Vec<(BranchId, Vote)> {
    let calls = plans.iter().map(|plan| async move {
        let vote = match timeout(prepare_timeout, plan.handle.prepare(&plan.branch_id)).await {
            Ok(Ok(PrepareVote::Yes)) => Vote::Yes,
            Ok(Ok(PrepareVote::No)) => Vote::No,
            Ok(Err(e)) => {
                warn!(
                    branch_id = %plan.branch_id,
                    resource_manager_id = %plan.resource_manager_id,
                    error = %e,
                    "Prepare failed, vote is indeterminate"
                );
                Vote::Indeterminate
            }
            Err(_) => {
                warn!(
                    branch_id = %plan.branch_id,
                    resource_manager_id = %plan.resource_manager_id,
                    timeout_ms = prepare_timeout.as_millis() as u64,
                    "Prepare timed out, vote is indeterminate"
                );
                Vote::Indeterminate
            }
        };
        (plan.branch_id.clone(), vote)
    });

    join_all(calls).await
}

/// Phase 2: drive every branch to the decided outcome concurrently.
///
/// Commit branches receive the commit verb. Under a rollback decision,
/// branches with a confirmed vote receive the rollback verb, while
/// prepare-indeterminate branches are resolved through a recovery
/// query first; a direct rollback to them could race a late prepare.
pub async fn run_phase_two(
    tx_id: &str,
    decision: Decision,
    plans: &[BranchPlan],
    config: &CoordinatorConfig,
) -> Vec<(BranchId, BranchOutcome)> {
    let backoff = BackoffPolicy::new(config.participant_retry_base_delay_ms);

    let calls = plans.iter().map(|plan| {
        let backoff = &backoff;
        async move {
            let outcome = match decision {
                Decision::Commit => commit_branch(tx_id, plan, config, backoff).await,
                Decision::Rollback => {
                    if plan.vote == Vote::Indeterminate {
                        resolve_indeterminate(tx_id, plan, config, backoff).await
                    } else {
                        rollback_branch(tx_id, plan, config, backoff).await
                    }
                }
            };
            (plan.branch_id.clone(), outcome)
        }
    });

    join_all(calls).await
}

async fn commit_branch(
    tx_id: &str,
    plan: &BranchPlan,
    config: &CoordinatorConfig,
    backoff: &BackoffPolicy,
) -> BranchOutcome {
    for attempt in 1..=config.phase_two_attempts {
        match timeout(config.phase_two_timeout, plan.handle.commit(&plan.branch_id)).await {
            Ok(Ok(())) => return BranchOutcome::Committed,
            Ok(Err(ParticipantError::AlreadyResolved(_))) => {
                debug!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    "Branch already committed, treating as acknowledged"
                );
                return BranchOutcome::Committed;
            }
            Ok(Err(ParticipantError::UnknownBranch(_))) => {
                error!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    resource_manager_id = %plan.resource_manager_id,
                    "Participant does not know a branch that voted yes, outcome is heuristic"
                );
                return BranchOutcome::Heuristic;
            }
            Ok(Err(e)) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    error = %e,
                    "Commit delivery failed"
                );
            }
            Err(_) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    "Commit delivery timed out"
                );
            }
        }
        if attempt < config.phase_two_attempts {
            tokio::time::sleep(backoff.delay_for(&plan.branch_id, attempt)).await;
        }
    }

    error!(
        tx_id = %tx_id,
        branch_id = %plan.branch_id,
        resource_manager_id = %plan.resource_manager_id,
        attempts = config.phase_two_attempts,
        "Commit undeliverable, branch outcome is heuristic"
    );
    BranchOutcome::Heuristic
}

async fn rollback_branch(
    tx_id: &str,
    plan: &BranchPlan,
    config: &CoordinatorConfig,
    backoff: &BackoffPolicy,
) -> BranchOutcome {
    for attempt in 1..=config.phase_two_attempts {
        match timeout(config.phase_two_timeout, plan.handle.rollback(&plan.branch_id)).await {
            Ok(Ok(())) => return BranchOutcome::RolledBack,
            Ok(Err(ParticipantError::AlreadyResolved(_))) => {
                debug!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    "Branch already rolled back, treating as acknowledged"
                );
                return BranchOutcome::RolledBack;
            }
            Ok(Err(ParticipantError::UnknownBranch(_))) => {
                // A branch with a confirmed vote that the participant
                // cannot find means coordinator and participant
                // disagree about history. This must surface loudly.
                error!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    resource_manager_id = %plan.resource_manager_id,
                    vote = %plan.vote,
                    "Participant does not know a voted branch on rollback, outcome is heuristic"
                );
                return BranchOutcome::Heuristic;
            }
            Ok(Err(e)) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    error = %e,
                    "Rollback delivery failed"
                );
            }
            Err(_) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    "Rollback delivery timed out"
                );
            }
        }
        if attempt < config.phase_two_attempts {
            tokio::time::sleep(backoff.delay_for(&plan.branch_id, attempt)).await;
        }
    }

    error!(
        tx_id = %tx_id,
        branch_id = %plan.branch_id,
        resource_manager_id = %plan.resource_manager_id,
        attempts = config.phase_two_attempts,
        "Rollback undeliverable, branch outcome is heuristic"
    );
    BranchOutcome::Heuristic
}

/// Resolve a prepare-indeterminate branch by asking the participant
/// what actually happened, instead of sending a rollback that could
/// race a prepare still in flight.
async fn resolve_indeterminate(
    tx_id: &str,
    plan: &BranchPlan,
    config: &CoordinatorConfig,
    backoff: &BackoffPolicy,
) -> BranchOutcome {
    for attempt in 1..=config.resolve_query_attempts {
        match timeout(
            config.phase_two_timeout,
            plan.handle.query_branch(&plan.branch_id),
        )
        .await
        {
            Ok(Ok(BranchStatus::Unprepared)) | Ok(Err(ParticipantError::UnknownBranch(_))) => {
                // The prepare never took effect; nothing to undo.
                info!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    "Indeterminate branch never prepared, resolved as rolled back"
                );
                return BranchOutcome::RolledBack;
            }
            Ok(Ok(BranchStatus::Prepared)) => {
                info!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    "Indeterminate branch did prepare, rolling it back"
                );
                return rollback_branch(tx_id, plan, config, backoff).await;
            }
            Ok(Ok(BranchStatus::Committed)) => {
                // The participant unilaterally committed prepared work.
                error!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    resource_manager_id = %plan.resource_manager_id,
                    "Indeterminate branch reports committed under a rollback decision"
                );
                return BranchOutcome::Committed;
            }
            Ok(Ok(BranchStatus::RolledBack)) => {
                return BranchOutcome::RolledBack;
            }
            Ok(Err(e)) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    error = %e,
                    "Recovery query failed"
                );
            }
            Err(_) => {
                warn!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    attempt = attempt,
                    "Recovery query timed out"
                );
            }
        }
        if attempt < config.resolve_query_attempts {
            tokio::time::sleep(backoff.delay_for(&plan.branch_id, attempt)).await;
        }
    }

    error!(
        tx_id = %tx_id,
        branch_id = %plan.branch_id,
        resource_manager_id = %plan.resource_manager_id,
        attempts = config.resolve_query_attempts,
        "Indeterminate branch unresolvable, outcome is heuristic"
    );
    BranchOutcome::Heuristic
}

/// Tell every participant it may discard branch bookkeeping.
/// Best-effort: failures are logged and ignored, the transaction is
/// already terminal.
pub async fn forget_all(tx_id: &str, plans: &[BranchPlan], forget_timeout: Duration) {
    let calls = plans.iter().map(|plan| async move {
        match timeout(forget_timeout, plan.handle.forget(&plan.branch_id)).await {
            Ok(Ok(())) | Ok(Err(ParticipantError::AlreadyResolved(_))) => {}
            Ok(Err(e)) => {
                debug!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    error = %e,
                    "Forget failed, participant will retain branch bookkeeping"
                );
            }
            Err(_) => {
                debug!(
                    tx_id = %tx_id,
                    branch_id = %plan.branch_id,
                    "Forget timed out"
                );
            }
        }
    });
    join_all(calls).await;
}
