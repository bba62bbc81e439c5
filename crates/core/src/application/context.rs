// Transaction Context
//
// In-memory working state of one in-flight transaction: the domain
// transaction plus the resource manager handle bound to each branch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Branch, BranchId, BranchOutcome, Transaction, TxPhase, Vote};
use crate::port::ResourceManagerHandle;

use super::phases::BranchPlan;

pub struct TransactionContext {
    tx: Transaction,
    handles: HashMap<BranchId, Arc<dyn ResourceManagerHandle>>,
}

impl TransactionContext {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            handles: HashMap::new(),
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx.id
    }

    pub fn phase(&self) -> TxPhase {
        self.tx.phase
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn transaction_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }

    /// Enlist a participant: creates the domain branch and binds the
    /// handle to it
    pub fn enlist(
        &mut self,
        handle: Arc<dyn ResourceManagerHandle>,
    ) -> crate::domain::Result<BranchId> {
        let branch_id = self
            .tx
            .enlist(handle.resource_manager_id().to_string())?;
        self.handles.insert(branch_id.clone(), handle);
        Ok(branch_id)
    }

    pub fn advance(&mut self, next: TxPhase) -> crate::domain::Result<()> {
        self.tx.advance(next)
    }

    pub fn mark_vote(&mut self, branch_id: &str, vote: Vote) -> crate::domain::Result<()> {
        self.tx.record_vote(branch_id, vote)
    }

    pub fn mark_outcome(
        &mut self,
        branch_id: &str,
        outcome: BranchOutcome,
    ) -> crate::domain::Result<()> {
        self.tx.record_outcome(branch_id, outcome)
    }

    pub fn branches(&self) -> &[Branch] {
        &self.tx.branches
    }

    /// Snapshot of every branch with its bound handle, for fan-out.
    /// Panics only if a branch was enlisted without a handle, which the
    /// enlist path makes impossible.
    pub fn branch_plans(&self) -> Vec<BranchPlan> {
        self.tx
            .branches
            .iter()
            .map(|b| BranchPlan {
                branch_id: b.branch_id.clone(),
                resource_manager_id: b.resource_manager_id.clone(),
                vote: b.vote,
                handle: Arc::clone(
                    self.handles
                        .get(&b.branch_id)
                        .unwrap_or_else(|| panic!("branch {} has no handle", b.branch_id)),
                ),
            })
            .collect()
    }
}
