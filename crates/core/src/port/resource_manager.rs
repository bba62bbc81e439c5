// Resource Manager Port (external participant contract)
//
// One handle per participant. The handle itself is stateless apart from
// the participant identity; all side effects happen on the remote
// resource manager.

use async_trait::async_trait;
use thiserror::Error;

/// Participant's answer to a prepare request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    Yes,
    No,
}

/// Participant-side state of a branch, as reported by a recovery query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    /// The participant has no prepared state for this branch
    Unprepared,
    Prepared,
    Committed,
    RolledBack,
}

/// Participant errors
#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("Participant unreachable: {0}")]
    Unreachable(String),

    #[error("Participant timed out after {0}ms")]
    Timeout(i64),

    /// The participant has no record of having prepared this branch.
    /// Received where a prepared branch was expected, this signals an
    /// ordering bug and must escalate, never be silently swallowed.
    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    /// The participant already resolved this branch (idempotent
    /// duplicate delivery, e.g. during recovery re-drives)
    #[error("Branch already resolved: {0}")]
    AlreadyResolved(String),
}

/// Resource Manager Handle trait
///
/// Each call is bound to one branch of one transaction. Callers bound
/// every invocation with a timeout; a local timeout never implies the
/// remote side also abandoned the call.
#[async_trait]
pub trait ResourceManagerHandle: Send + Sync {
    /// Stable identity of the participant this handle talks to
    fn resource_manager_id(&self) -> &str;

    /// Phase 1: ask the participant to durably prepare the branch
    ///
    /// # Errors
    /// - ParticipantError::Unreachable / Timeout if no answer arrived;
    ///   the branch may or may not have prepared remotely
    async fn prepare(&self, branch_id: &str) -> Result<PrepareVote, ParticipantError>;

    /// Phase 2: durably apply the prepared branch
    async fn commit(&self, branch_id: &str) -> Result<(), ParticipantError>;

    /// Phase 2: discard the prepared branch
    ///
    /// # Errors
    /// - ParticipantError::UnknownBranch if the participant never
    ///   prepared this branch
    async fn rollback(&self, branch_id: &str) -> Result<(), ParticipantError>;

    /// Tell the participant it may discard all bookkeeping for the
    /// branch; idempotent, best-effort
    async fn forget(&self, branch_id: &str) -> Result<(), ParticipantError>;

    /// Recovery query: the participant-side state of the branch.
    /// Idempotent; used to resolve prepare-indeterminate branches
    /// instead of an optimistic rollback call.
    async fn query_branch(&self, branch_id: &str) -> Result<BranchStatus, ParticipantError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Scripted prepare behavior
    #[derive(Debug, Clone)]
    pub enum PrepareScript {
        VoteYes,
        VoteNo,
        Unreachable,
        Timeout,
        /// Never answer; the coordinator's own timeout must fire
        Hang,
    }

    /// Scripted commit/rollback behavior
    #[derive(Debug, Clone)]
    pub enum AckScript {
        Ack,
        Unreachable,
        UnknownBranch,
        AlreadyResolved,
        Hang,
    }

    /// Scripted recovery-query behavior
    #[derive(Debug, Clone)]
    pub enum QueryScript {
        Status(BranchStatus),
        Unreachable,
        UnknownBranch,
        Hang,
    }

    /// Per-call script: responses are consumed in order, the last one
    /// repeats (so retries can be exercised deterministically).
    struct Script<T: Clone> {
        seq: Vec<T>,
        next: usize,
    }

    impl<T: Clone> Script<T> {
        fn new(seq: Vec<T>) -> Self {
            Self { seq, next: 0 }
        }

        fn take(&mut self) -> T {
            let idx = self.next.min(self.seq.len() - 1);
            self.next += 1;
            self.seq[idx].clone()
        }
    }

    /// Mock resource manager for testing.
    ///
    /// Records every verb issued to it (as `"verb:branch_id"`) so tests
    /// can assert routing, e.g. that an indeterminate branch was never
    /// sent a rollback.
    pub struct MockResourceManager {
        id: String,
        prepare: Mutex<Script<PrepareScript>>,
        commit: Mutex<Script<AckScript>>,
        rollback: Mutex<Script<AckScript>>,
        forget: Mutex<Script<AckScript>>,
        query: Mutex<Script<QueryScript>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockResourceManager {
        /// A well-behaved participant: votes yes, acks everything
        pub fn new(id: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                prepare: Mutex::new(Script::new(vec![PrepareScript::VoteYes])),
                commit: Mutex::new(Script::new(vec![AckScript::Ack])),
                rollback: Mutex::new(Script::new(vec![AckScript::Ack])),
                forget: Mutex::new(Script::new(vec![AckScript::Ack])),
                query: Mutex::new(Script::new(vec![QueryScript::Status(BranchStatus::Prepared)])),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_prepare(self, script: PrepareScript) -> Self {
            self.with_prepare_sequence(vec![script])
        }

        pub fn with_prepare_sequence(self, seq: Vec<PrepareScript>) -> Self {
            *self.prepare.lock().unwrap() = Script::new(seq);
            self
        }

        pub fn with_commit(self, script: AckScript) -> Self {
            self.with_commit_sequence(vec![script])
        }

        pub fn with_commit_sequence(self, seq: Vec<AckScript>) -> Self {
            *self.commit.lock().unwrap() = Script::new(seq);
            self
        }

        pub fn with_rollback(self, script: AckScript) -> Self {
            self.with_rollback_sequence(vec![script])
        }

        pub fn with_rollback_sequence(self, seq: Vec<AckScript>) -> Self {
            *self.rollback.lock().unwrap() = Script::new(seq);
            self
        }

        pub fn with_forget(self, script: AckScript) -> Self {
            self.with_forget_sequence(vec![script])
        }

        pub fn with_forget_sequence(self, seq: Vec<AckScript>) -> Self {
            *self.forget.lock().unwrap() = Script::new(seq);
            self
        }

        pub fn with_query(self, script: QueryScript) -> Self {
            self.with_query_sequence(vec![script])
        }

        pub fn with_query_sequence(self, seq: Vec<QueryScript>) -> Self {
            *self.query.lock().unwrap() = Script::new(seq);
            self
        }

        /// Every verb issued to this participant, in order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// How many times a verb ("prepare", "rollback", ...) was issued
        pub fn verb_count(&self, verb: &str) -> usize {
            let prefix = format!("{}:", verb);
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(&prefix))
                .count()
        }

        fn record(&self, verb: &str, branch_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", verb, branch_id));
        }
    }

    #[async_trait]
    impl ResourceManagerHandle for MockResourceManager {
        fn resource_manager_id(&self) -> &str {
            &self.id
        }

        async fn prepare(&self, branch_id: &str) -> Result<PrepareVote, ParticipantError> {
            self.record("prepare", branch_id);
            let script = self.prepare.lock().unwrap().take();
            match script {
                PrepareScript::VoteYes => Ok(PrepareVote::Yes),
                PrepareScript::VoteNo => Ok(PrepareVote::No),
                PrepareScript::Unreachable => {
                    Err(ParticipantError::Unreachable("connection refused".to_string()))
                }
                PrepareScript::Timeout => Err(ParticipantError::Timeout(0)),
                PrepareScript::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn commit(&self, branch_id: &str) -> Result<(), ParticipantError> {
            self.record("commit", branch_id);
            let script = self.commit.lock().unwrap().take();
            match script {
                AckScript::Ack => Ok(()),
                AckScript::Unreachable => {
                    Err(ParticipantError::Unreachable("connection refused".to_string()))
                }
                AckScript::UnknownBranch => {
                    Err(ParticipantError::UnknownBranch(branch_id.to_string()))
                }
                AckScript::AlreadyResolved => {
                    Err(ParticipantError::AlreadyResolved(branch_id.to_string()))
                }
                AckScript::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn rollback(&self, branch_id: &str) -> Result<(), ParticipantError> {
            self.record("rollback", branch_id);
            let script = self.rollback.lock().unwrap().take();
            match script {
                AckScript::Ack => Ok(()),
                AckScript::Unreachable => {
                    Err(ParticipantError::Unreachable("connection refused".to_string()))
                }
                AckScript::UnknownBranch => {
                    Err(ParticipantError::UnknownBranch(branch_id.to_string()))
                }
                AckScript::AlreadyResolved => {
                    Err(ParticipantError::AlreadyResolved(branch_id.to_string()))
                }
                AckScript::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn forget(&self, branch_id: &str) -> Result<(), ParticipantError> {
            self.record("forget", branch_id);
            let script = self.forget.lock().unwrap().take();
            match script {
                AckScript::Ack => Ok(()),
                AckScript::Unreachable => {
                    Err(ParticipantError::Unreachable("connection refused".to_string()))
                }
                AckScript::UnknownBranch => {
                    Err(ParticipantError::UnknownBranch(branch_id.to_string()))
                }
                AckScript::AlreadyResolved => {
                    Err(ParticipantError::AlreadyResolved(branch_id.to_string()))
                }
                AckScript::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn query_branch(&self, branch_id: &str) -> Result<BranchStatus, ParticipantError> {
            self.record("query", branch_id);
            let script = self.query.lock().unwrap().take();
            match script {
                QueryScript::Status(status) => Ok(status),
                QueryScript::Unreachable => {
                    Err(ParticipantError::Unreachable("connection refused".to_string()))
                }
                QueryScript::UnknownBranch => {
                    Err(ParticipantError::UnknownBranch(branch_id.to_string()))
                }
                QueryScript::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }
}
