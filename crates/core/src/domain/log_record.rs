// Transaction Log Record Model
//
// The durable wire format of the append-only transaction log. Resolution
// is always represented by appending a new record, never by rewriting
// history.

use serde::{Deserialize, Serialize};

use crate::domain::transaction::{BranchId, Decision, ResourceManagerId, TxId, TxOutcome, Vote};

/// Kind of a persisted log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    /// Transaction was created (no branch knowledge yet)
    Created,
    /// Full prepare vote set, written before any phase-2 verb is issued
    Votes,
    /// The global commit-or-rollback decision
    Decision,
    /// Terminal global outcome; the transaction is resolved
    Terminal,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::Created => write!(f, "CREATED"),
            RecordType::Votes => write!(f, "VOTES"),
            RecordType::Decision => write!(f, "DECISION"),
            RecordType::Terminal => write!(f, "TERMINAL"),
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(RecordType::Created),
            "VOTES" => Ok(RecordType::Votes),
            "DECISION" => Ok(RecordType::Decision),
            "TERMINAL" => Ok(RecordType::Terminal),
            other => Err(format!("unknown record type: {}", other)),
        }
    }
}

/// One persisted log record. Sequence numbers are assigned by the log,
/// strictly increasing per transaction id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub tx_id: TxId,
    pub sequence_no: i64,
    pub record_type: RecordType,
    pub payload: serde_json::Value,
    pub logged_at: i64, // epoch ms
}

/// One branch's entry in the durable vote set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchVote {
    pub branch_id: BranchId,
    pub resource_manager_id: ResourceManagerId,
    pub vote: Vote,
}

/// Payload of a VOTES record: the durability point that makes recovery
/// possible
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VotesPayload {
    pub branches: Vec<BranchVote>,
}

/// Payload of a DECISION record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub decision: Decision,
}

/// Payload of a TERMINAL record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalPayload {
    pub outcome: TxOutcome,
}
