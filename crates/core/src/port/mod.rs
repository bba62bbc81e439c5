// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod maintenance;
pub mod resource_manager;
pub mod time_provider;
pub mod transaction_log;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use resource_manager::{BranchStatus, ParticipantError, PrepareVote, ResourceManagerHandle};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transaction_log::{TransactionLog, UnresolvedTransaction};
