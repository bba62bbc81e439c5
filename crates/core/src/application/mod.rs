// Application Layer - Coordination services over domain + ports

pub mod backoff;
pub mod constants;
pub mod context;
pub mod coordinator;
pub mod maintenance;
pub mod phases;
pub mod recovery;
pub mod shutdown;

#[cfg(test)]
mod coordinator_test;

pub use backoff::BackoffPolicy;
pub use context::TransactionContext;
pub use coordinator::{
    BranchSnapshot, CoordinatorConfig, CoordinatorService, TransactionSnapshot,
};
pub use maintenance::MaintenanceScheduler;
pub use recovery::RecoveryService;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
