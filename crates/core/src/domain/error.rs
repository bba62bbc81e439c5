// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Coordinator-internal bug class: a phase or vote moved backward.
    /// Never expected in normal operation and fatal to the transaction.
    #[error("Illegal transaction state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Resource manager already enlisted in this transaction: {0}")]
    AlreadyEnlisted(String),

    #[error("Enlistment window is closed: transaction is {phase}")]
    EnlistmentClosed { phase: String },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch outcome is immutable: {branch_id} is already {outcome}")]
    OutcomeImmutable { branch_id: String, outcome: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
