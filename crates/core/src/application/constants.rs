// Coordinator Constants
//
// Single source for timeouts and retry counts. No magic values inline.

use std::time::Duration;

/// Per-branch bound on a phase-1 prepare call
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-branch bound on a single phase-2 commit/rollback call
pub const DEFAULT_PHASE_TWO_TIMEOUT: Duration = Duration::from_secs(5);

/// Phase-2 delivery attempts per branch before declaring it heuristic
pub const PHASE_TWO_ATTEMPTS: u32 = 3;

/// Recovery-query attempts for a prepare-indeterminate branch before
/// giving up and declaring it heuristic
pub const RESOLVE_QUERY_ATTEMPTS: u32 = 3;

/// Base delay between participant retries (exponential backoff)
pub const PARTICIPANT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Log append attempts before surfacing a write failure
pub const LOG_APPEND_ATTEMPTS: u32 = 5;

/// Base delay between log append retries
pub const LOG_APPEND_BASE_DELAY_MS: u64 = 100;

/// Bound on a best-effort forget call
pub const FORGET_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client rollback waits for an in-flight prepare round
/// before reporting the transaction as contended
pub const CANCEL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved transactions older than this are archived by maintenance
pub const DEFAULT_RESOLVED_RETENTION_DAYS: i64 = 7;

/// Default interval between maintenance cycles
pub const DEFAULT_MAINTENANCE_INTERVAL_HOURS: u64 = 24;
