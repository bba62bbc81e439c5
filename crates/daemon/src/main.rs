//! Pactum Transaction Coordinator - Main Entry Point

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use pactum_api_rpc::{RpcServer, RpcServerConfig};
use pactum_core::application::{
    shutdown_channel, CoordinatorConfig, CoordinatorService, MaintenanceScheduler, RecoveryService,
};
use pactum_core::port::id_provider::UuidProvider;
use pactum_core::port::time_provider::SystemTimeProvider;
use pactum_core::port::MaintenanceConfig;
use pactum_infra_sqlite::{create_pool, run_migrations, SqliteMaintenance, SqliteTransactionLog};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.pactum/txlog.db";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("PACTUM_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("pactum=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Pactum Transaction Coordinator v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("PACTUM_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let rpc_port: u16 = std::env::var("PACTUM_RPC_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9621);

    info!(db_path = %db_path, "Initializing transaction log...");

    // 3. Initialize transaction log store
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let tx_log = Arc::new(SqliteTransactionLog::new(
        pool.clone(),
        time_provider.clone(),
    ));

    let coordinator = Arc::new(CoordinatorService::new(
        tx_log.clone(),
        id_provider,
        time_provider.clone(),
        CoordinatorConfig::default(),
    ));

    // 5. Run in-doubt transaction recovery
    //
    // Participant handles are registered by the embedding application;
    // a fresh daemon has none yet, so transactions whose participants
    // are not back are skipped and stay in the log for the next pass.
    info!("Running in-doubt transaction recovery...");
    let recovery_service = RecoveryService::new(
        tx_log.clone(),
        coordinator.resource_managers().await,
        CoordinatorConfig::default(),
    );

    match recovery_service.recover().await {
        Ok(count) => info!(recovered_transactions = count, "Recovery completed"),
        Err(e) => tracing::error!(error = ?e, "Recovery failed"),
    }

    // 6. Initialize maintenance service (needed for RPC server)
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));

    // 7. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        port: rpc_port,
        ..Default::default()
    };
    let rpc_server = RpcServer::new(rpc_config, coordinator.clone(), maintenance.clone());
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 8. Start maintenance scheduler
    info!("Starting maintenance scheduler...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let maintenance_scheduler =
        MaintenanceScheduler::new(maintenance, MaintenanceConfig::default());

    let maintenance_handle = tokio::spawn(async move {
        maintenance_scheduler.run(shutdown_rx).await;
    });

    info!("Coordinator ready. Waiting for transactions...");
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), maintenance_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
