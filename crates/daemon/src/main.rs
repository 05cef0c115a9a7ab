//! Citewatch daemon - Main Entry Point

mod config;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use citewatch_api_rpc::{RpcServer, RpcServerConfig};
use citewatch_core::application::constants::{
    DEFAULT_RETRY_BASE_DELAY_MS, GRACEFUL_SHUTDOWN_TIMEOUT_MS,
};
use citewatch_core::application::{
    shutdown_channel, AdapterRegistry, Orchestrator, OrchestratorConfig, OrchestratorDeps,
    PlatformClients, RecoveryService, RetryPolicy, SessionConfig, SessionManager, TaskQueue,
};
use citewatch_core::port::{LogNotifier, SystemTimeProvider, UuidProvider};
use citewatch_infra_browser::{BrowserConfig, ChromeLauncher};
use citewatch_infra_http::{HttpPlatformClient, PlatformConfig};
use citewatch_infra_sqlite::{
    create_pool, run_migrations, SqliteQueueStore, SqliteScheduler, SqliteStateStore,
};
use citewatch_infra_system::SignalProcessControl;
use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging (the guard flushes file output on exit)
    let _log_guard = telemetry::init_logging()?;
    info!(version = %citewatch_core::VERSION, "Citewatch daemon starting");

    // 2. Configuration
    let config = DaemonConfig::from_env();
    info!(
        db_path = %config.db_path.display(),
        rpc_port = %config.rpc_port,
        max_sessions = %config.max_sessions,
        headed = %config.headed,
        "Configuration loaded"
    );

    // 3. Database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Dependencies (DI wiring)
    let clock = Arc::new(SystemTimeProvider);
    let queue = Arc::new(TaskQueue::new(
        Arc::new(SqliteQueueStore::new(pool.clone())),
        clock.clone(),
        RetryPolicy::new(DEFAULT_RETRY_BASE_DELAY_MS, config.max_attempts),
    ));
    let state_store = Arc::new(SqliteStateStore::new(pool.clone(), clock.clone()));

    // 5. Crash recovery: requeue interrupted work, kill a leftover browser
    let recovery = RecoveryService::new(
        queue.clone(),
        state_store.clone(),
        Arc::new(SignalProcessControl::new()),
    );
    match recovery.recover().await {
        Ok(report) => info!(
            requeued = %report.requeued,
            stale_browser_killed = %report.stale_browser_killed,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 6. Targets
    let registry = match &config.targets {
        Some(ids) => {
            let (registry, unknown) = AdapterRegistry::restricted_to(ids);
            if !unknown.is_empty() {
                warn!(unknown = ?unknown, "Ignoring unsupported targets");
            }
            registry
        }
        None => AdapterRegistry::with_defaults(),
    };
    info!(targets = ?registry.ids(), "Targets enabled");

    // 7. Browser
    let browser = Arc::new(
        ChromeLauncher::new(BrowserConfig {
            binary: config.browser_path.clone(),
            profile_dir: config.profile_dir.clone(),
            headed: config.headed,
        })
        .launch()
        .await
        .context("Browser launch failed")?,
    );
    let sessions = Arc::new(SessionManager::new(
        browser.clone(),
        Arc::new(registry),
        clock.clone(),
        SessionConfig {
            task_timeout: config.task_timeout,
            ..Default::default()
        },
    ));

    // 8. Platform API
    if config.api_base_url.is_none() {
        warn!("CITEWATCH_API_BASE_URL not set; polling and result upload are disabled");
    }
    let platform = HttpPlatformClient::new(PlatformConfig {
        base_url: config.api_base_url.clone(),
        token: config.api_token.clone(),
    })
    .context("Platform client setup failed")?;

    // 9. Orchestrator
    let orchestrator = Orchestrator::new(
        OrchestratorDeps {
            queue,
            sessions,
            state_store,
            scheduler: Arc::new(SqliteScheduler::new(pool.clone())),
            platform: PlatformClients::from_client(Arc::new(platform)),
            notifier: Arc::new(LogNotifier),
            clock,
            ids: Arc::new(UuidProvider),
        },
        OrchestratorConfig {
            max_concurrent_sessions: config.max_sessions,
            ..Default::default()
        },
    );
    orchestrator.set_browser_pid(browser.pid()).await?;
    let state = orchestrator.start().await?;
    info!(mode = %state.mode, "Orchestrator started");

    // 10. JSON-RPC control surface
    let (rpc_addr, rpc_handle) = RpcServer::new(
        RpcServerConfig {
            port: config.rpc_port,
            ..Default::default()
        },
        orchestrator.clone(),
    )
    .start()
    .await
    .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 11. Alarm loop
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let loop_handle = tokio::spawn(orchestrator.clone().run(shutdown_rx));

    info!(rpc = %rpc_addr, "System ready");
    info!("Press Ctrl+C to shutdown");

    // 12. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 13. Graceful shutdown
    let grace = Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS as u64);
    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server stop failed");
    }
    match tokio::time::timeout(grace, loop_handle).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Orchestrator loop failed"),
        Ok(Err(e)) => error!(error = %e, "Orchestrator loop panicked"),
        Err(_) => warn!("Orchestrator loop did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }
    if !orchestrator.drain(grace).await {
        warn!("Pipelines still running at shutdown; their tasks resume on next start");
    }
    browser.shutdown().await;
    if let Err(e) = orchestrator.set_browser_pid(None).await {
        warn!(error = %e, "Failed to clear browser pid");
    }

    info!("Shutdown complete.");
    Ok(())
}
