// Domain Layer - Pure two-phase commit state machine and log record model

pub mod error;
pub mod log_record;
pub mod transaction;

// Re-exports
pub use error::{DomainError, Result};
pub use log_record::{BranchVote, DecisionPayload, LogRecord, RecordType, TerminalPayload, VotesPayload};
pub use transaction::{
    combine_outcomes, Branch, BranchId, BranchOutcome, Decision, ResourceManagerId, Transaction,
    TxId, TxOutcome, TxPhase, Vote,
};
