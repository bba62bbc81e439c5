// Transaction Domain Model - the 2PC state machine

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Global transaction ID (UUID v4)
pub type TxId = String;

/// Transaction branch ID (one branch per enlisted resource manager)
pub type BranchId = String;

/// Stable identity of a participating resource manager
pub type ResourceManagerId = String;

/// Transaction phase. Monotonic: a transaction never moves backward,
/// and every mutation is checked against the legal transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxPhase {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    HeuristicMixed,
    HeuristicHazard,
}

impl TxPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxPhase::Committed
                | TxPhase::RolledBack
                | TxPhase::HeuristicMixed
                | TxPhase::HeuristicHazard
        )
    }

    /// Legal forward transitions of the coordinator state machine
    fn can_advance_to(self, next: TxPhase) -> bool {
        use TxPhase::*;
        matches!(
            (self, next),
            (Active, Preparing)
                | (Active, RollingBack)
                | (Preparing, Prepared)
                | (Preparing, RollingBack)
                | (Preparing, HeuristicHazard)
                | (Prepared, Committing)
                | (Prepared, RollingBack)
                | (Committing, Committed)
                | (Committing, HeuristicMixed)
                | (Committing, HeuristicHazard)
                | (RollingBack, RolledBack)
                | (RollingBack, HeuristicMixed)
                | (RollingBack, HeuristicHazard)
        )
    }
}

impl std::fmt::Display for TxPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxPhase::Active => write!(f, "ACTIVE"),
            TxPhase::Preparing => write!(f, "PREPARING"),
            TxPhase::Prepared => write!(f, "PREPARED"),
            TxPhase::Committing => write!(f, "COMMITTING"),
            TxPhase::Committed => write!(f, "COMMITTED"),
            TxPhase::RollingBack => write!(f, "ROLLING_BACK"),
            TxPhase::RolledBack => write!(f, "ROLLED_BACK"),
            TxPhase::HeuristicMixed => write!(f, "HEURISTIC_MIXED"),
            TxPhase::HeuristicHazard => write!(f, "HEURISTIC_HAZARD"),
        }
    }
}

/// Recorded prepare result for one branch.
///
/// Three-valued on purpose: a branch that timed out or was unreachable is
/// INDETERMINATE, never NO - it may have prepared on the remote side
/// despite the local failure, so it must not be sent a blind rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Unknown,
    Yes,
    No,
    Indeterminate,
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vote::Unknown => write!(f, "UNKNOWN"),
            Vote::Yes => write!(f, "YES"),
            Vote::No => write!(f, "NO"),
            Vote::Indeterminate => write!(f, "INDETERMINATE"),
        }
    }
}

/// Terminal state of one branch after phase 2 (or recovery)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchOutcome {
    Unknown,
    Committed,
    RolledBack,
    /// The branch's true state is permanently unknowable to the
    /// coordinator (exhausted retries, or UnknownBranch where a prepared
    /// branch was expected)
    Heuristic,
}

impl std::fmt::Display for BranchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchOutcome::Unknown => write!(f, "UNKNOWN"),
            BranchOutcome::Committed => write!(f, "COMMITTED"),
            BranchOutcome::RolledBack => write!(f, "ROLLED_BACK"),
            BranchOutcome::Heuristic => write!(f, "HEURISTIC"),
        }
    }
}

/// Global outcome reported to the client.
///
/// Heuristic outcomes are first-class results, not exceptions: callers
/// must be able to distinguish "safely rolled back" from "needs manual
/// reconciliation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxOutcome {
    Committed,
    RolledBack,
    /// Branches ended in inconsistent but known states (some committed,
    /// some rolled back)
    HeuristicMixed,
    /// At least one branch's state is permanently unknowable
    HeuristicHazard,
}

impl TxOutcome {
    /// The terminal phase a transaction reaches for this outcome
    pub fn terminal_phase(&self) -> TxPhase {
        match self {
            TxOutcome::Committed => TxPhase::Committed,
            TxOutcome::RolledBack => TxPhase::RolledBack,
            TxOutcome::HeuristicMixed => TxPhase::HeuristicMixed,
            TxOutcome::HeuristicHazard => TxPhase::HeuristicHazard,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self, TxOutcome::HeuristicMixed | TxOutcome::HeuristicHazard)
    }
}

impl std::fmt::Display for TxOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxOutcome::Committed => write!(f, "COMMITTED"),
            TxOutcome::RolledBack => write!(f, "ROLLED_BACK"),
            TxOutcome::HeuristicMixed => write!(f, "HEURISTIC_MIXED"),
            TxOutcome::HeuristicHazard => write!(f, "HEURISTIC_HAZARD"),
        }
    }
}

/// The coordinator's phase-2 decision, durably logged before any
/// commit or rollback verb is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Commit,
    Rollback,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Commit => write!(f, "COMMIT"),
            Decision::Rollback => write!(f, "ROLLBACK"),
        }
    }
}

/// One resource manager's participation in a transaction.
/// Owned exclusively by its parent Transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: BranchId,
    pub resource_manager_id: ResourceManagerId,
    pub vote: Vote,
    pub outcome: BranchOutcome,
}

impl Branch {
    fn new(branch_id: BranchId, resource_manager_id: ResourceManagerId) -> Self {
        Self {
            branch_id,
            resource_manager_id,
            vote: Vote::Unknown,
            outcome: BranchOutcome::Unknown,
        }
    }

    /// Votes are set exactly once, during the prepare round
    pub fn record_vote(&mut self, vote: Vote) -> Result<()> {
        if self.vote != Vote::Unknown {
            return Err(DomainError::IllegalTransition {
                from: format!("vote {}", self.vote),
                to: format!("vote {}", vote),
            });
        }
        self.vote = vote;
        Ok(())
    }

    /// A branch outcome other than UNKNOWN is immutable; recording the
    /// same outcome again is an idempotent no-op (recovery replays).
    pub fn record_outcome(&mut self, outcome: BranchOutcome) -> Result<()> {
        if self.outcome == BranchOutcome::Unknown || self.outcome == outcome {
            self.outcome = outcome;
            return Ok(());
        }
        Err(DomainError::OutcomeImmutable {
            branch_id: self.branch_id.clone(),
            outcome: self.outcome.to_string(),
        })
    }
}

/// Combine per-branch terminal outcomes into the global outcome.
///
/// Any unknowable branch makes the transaction HEURISTIC_HAZARD; a unanimous
/// match with the decision yields the clean outcome; anything else is
/// HEURISTIC_MIXED (some branch ended against the decision).
pub fn combine_outcomes(
    decision: Decision,
    outcomes: impl IntoIterator<Item = BranchOutcome>,
) -> TxOutcome {
    let expected = match decision {
        Decision::Commit => BranchOutcome::Committed,
        Decision::Rollback => BranchOutcome::RolledBack,
    };

    let mut all_expected = true;
    for outcome in outcomes {
        match outcome {
            BranchOutcome::Unknown | BranchOutcome::Heuristic => return TxOutcome::HeuristicHazard,
            o if o == expected => {}
            _ => all_expected = false,
        }
    }

    if all_expected {
        match decision {
            Decision::Commit => TxOutcome::Committed,
            Decision::Rollback => TxOutcome::RolledBack,
        }
    } else {
        TxOutcome::HeuristicMixed
    }
}

/// Transaction aggregate: one logical transaction and its branches.
///
/// Created ACTIVE by the client API, mutated only by the coordinator,
/// destroyed only after the phase is terminal. Branches of a cleanly
/// resolved transaction are sent a best-effort forget before teardown;
/// heuristic resolutions skip forget so the participant keeps its
/// bookkeeping for the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub phase: TxPhase,
    /// Insertion order = enlistment order
    pub branches: Vec<Branch>,
    pub created_at: i64, // epoch ms
    pub finished_at: Option<i64>,
}

impl Transaction {
    /// Create a new ACTIVE transaction
    ///
    /// # Arguments
    ///
    /// * `id` - Unique transaction ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            phase: TxPhase::Active,
            branches: Vec::new(),
            created_at,
            finished_at: None,
        }
    }

    /// Create a test transaction with deterministic ID and timestamp.
    ///
    /// **Note**: tests only. Production code injects ID and time via
    /// providers.
    pub fn new_test() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(format!("tx-test-{}", counter), (counter * 1000) as i64)
    }

    /// Enlist a resource manager as a new branch.
    ///
    /// Rejected outside the ACTIVE phase and for a resource manager that
    /// is already a participant of this transaction.
    pub fn enlist(&mut self, resource_manager_id: impl Into<String>) -> Result<BranchId> {
        if self.phase != TxPhase::Active {
            return Err(DomainError::EnlistmentClosed {
                phase: self.phase.to_string(),
            });
        }

        let resource_manager_id = resource_manager_id.into();
        if self
            .branches
            .iter()
            .any(|b| b.resource_manager_id == resource_manager_id)
        {
            return Err(DomainError::AlreadyEnlisted(resource_manager_id));
        }

        let branch_id = format!("{}-{}", self.id, self.branches.len() + 1);
        self.branches
            .push(Branch::new(branch_id.clone(), resource_manager_id));
        Ok(branch_id)
    }

    pub fn branch(&self, branch_id: &str) -> Result<&Branch> {
        self.branches
            .iter()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| DomainError::BranchNotFound(branch_id.to_string()))
    }

    fn branch_mut(&mut self, branch_id: &str) -> Result<&mut Branch> {
        self.branches
            .iter_mut()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| DomainError::BranchNotFound(branch_id.to_string()))
    }

    /// Advance the phase, enforcing monotonicity
    pub fn advance(&mut self, next: TxPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(DomainError::IllegalTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn record_vote(&mut self, branch_id: &str, vote: Vote) -> Result<()> {
        self.branch_mut(branch_id)?.record_vote(vote)
    }

    pub fn record_outcome(&mut self, branch_id: &str, outcome: BranchOutcome) -> Result<()> {
        self.branch_mut(branch_id)?.record_outcome(outcome)
    }

    /// True when every branch answered YES (vacuously true for an empty
    /// transaction)
    pub fn all_voted_yes(&self) -> bool {
        self.branches.iter().all(|b| b.vote == Vote::Yes)
    }

    pub fn has_indeterminate(&self) -> bool {
        self.branches.iter().any(|b| b.vote == Vote::Indeterminate)
    }

    /// Global outcome per the recorded branch outcomes and the phase-2
    /// decision
    pub fn global_outcome(&self, decision: Decision) -> TxOutcome {
        combine_outcomes(decision, self.branches.iter().map(|b| b.outcome))
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to the terminal phase for `outcome` with an explicit timestamp
    pub fn finish(&mut self, outcome: TxOutcome, now_millis: i64) -> Result<()> {
        self.advance(outcome.terminal_phase())?;
        self.finished_at = Some(now_millis);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_active() {
        let tx = Transaction::new("tx-1", 1000);
        assert_eq!(tx.phase, TxPhase::Active);
        assert!(tx.branches.is_empty());
        assert!(tx.finished_at.is_none());
    }

    #[test]
    fn test_enlist_assigns_ordered_branch_ids() {
        let mut tx = Transaction::new("tx-1", 1000);
        let b1 = tx.enlist("rm-a").unwrap();
        let b2 = tx.enlist("rm-b").unwrap();
        assert_eq!(b1, "tx-1-1");
        assert_eq!(b2, "tx-1-2");
        assert_eq!(tx.branches[0].resource_manager_id, "rm-a");
        assert_eq!(tx.branches[1].resource_manager_id, "rm-b");
    }

    #[test]
    fn test_duplicate_enlistment_rejected() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.enlist("rm-a").unwrap();
        let err = tx.enlist("rm-a").unwrap_err();
        assert!(matches!(err, DomainError::AlreadyEnlisted(_)));
    }

    #[test]
    fn test_enlist_rejected_after_prepare_starts() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.enlist("rm-a").unwrap();
        tx.advance(TxPhase::Preparing).unwrap();
        let err = tx.enlist("rm-b").unwrap_err();
        assert!(matches!(err, DomainError::EnlistmentClosed { .. }));
    }

    #[test]
    fn test_phase_is_monotonic() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.advance(TxPhase::Preparing).unwrap();
        let err = tx.advance(TxPhase::Active).unwrap_err();
        assert!(matches!(err, DomainError::IllegalTransition { .. }));
    }

    #[test]
    fn test_commit_path_transitions() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.advance(TxPhase::Preparing).unwrap();
        tx.advance(TxPhase::Prepared).unwrap();
        tx.advance(TxPhase::Committing).unwrap();
        tx.advance(TxPhase::Committed).unwrap();
        assert!(tx.is_terminal());
    }

    #[test]
    fn test_cannot_commit_from_preparing_directly() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.advance(TxPhase::Preparing).unwrap();
        assert!(tx.advance(TxPhase::Committing).is_err());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let mut tx = Transaction::new("tx-1", 1000);
        tx.advance(TxPhase::RollingBack).unwrap();
        tx.advance(TxPhase::RolledBack).unwrap();
        assert!(tx.advance(TxPhase::Preparing).is_err());
        assert!(tx.advance(TxPhase::HeuristicHazard).is_err());
    }

    #[test]
    fn test_vote_recorded_once() {
        let mut tx = Transaction::new("tx-1", 1000);
        let b = tx.enlist("rm-a").unwrap();
        tx.record_vote(&b, Vote::Yes).unwrap();
        assert!(tx.record_vote(&b, Vote::No).is_err());
        assert_eq!(tx.branch(&b).unwrap().vote, Vote::Yes);
    }

    #[test]
    fn test_outcome_immutable_once_terminal() {
        let mut tx = Transaction::new("tx-1", 1000);
        let b = tx.enlist("rm-a").unwrap();
        tx.record_outcome(&b, BranchOutcome::Committed).unwrap();
        // idempotent replay is fine
        tx.record_outcome(&b, BranchOutcome::Committed).unwrap();
        let err = tx.record_outcome(&b, BranchOutcome::RolledBack).unwrap_err();
        assert!(matches!(err, DomainError::OutcomeImmutable { .. }));
    }

    #[test]
    fn test_combine_outcomes_table() {
        use BranchOutcome::*;

        // unanimous
        assert_eq!(
            combine_outcomes(Decision::Commit, vec![Committed, Committed]),
            TxOutcome::Committed
        );
        assert_eq!(
            combine_outcomes(Decision::Rollback, vec![RolledBack, RolledBack]),
            TxOutcome::RolledBack
        );

        // some branch ended against the decision
        assert_eq!(
            combine_outcomes(Decision::Rollback, vec![Committed, RolledBack]),
            TxOutcome::HeuristicMixed
        );

        // unknowable branch dominates everything
        assert_eq!(
            combine_outcomes(Decision::Rollback, vec![Heuristic, RolledBack]),
            TxOutcome::HeuristicHazard
        );
        assert_eq!(
            combine_outcomes(Decision::Commit, vec![Committed, Unknown]),
            TxOutcome::HeuristicHazard
        );
    }

    #[test]
    fn test_combine_outcomes_empty_transaction() {
        assert_eq!(
            combine_outcomes(Decision::Commit, Vec::new()),
            TxOutcome::Committed
        );
        assert_eq!(
            combine_outcomes(Decision::Rollback, Vec::new()),
            TxOutcome::RolledBack
        );
    }
}
