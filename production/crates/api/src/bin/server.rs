//! Kernel Orchestrator API Server
//!
//! Wires storage, ledger collaborators and the orchestration services
//! together from environment variables and serves the REST API.

use anyhow::Result;
use kernel_api::{start_server, AppState};
use kernel_ledger::{
    ContractClient, HttpLedgerClient, SettlementClient, SimulatedContract, SimulatedSettlement,
    SimulatedWitness, WitnessClient,
};
use kernel_orchestrator::{
    HttpCallbackNotifier, OperationOrchestratorBuilder, OrchestrationConfigBuilder,
    TimingCoordinator, TtlSweeperBuilder,
};
use kernel_storage::{MemoryStorage, OperationRepository, PostgresConfig, PostgresStorage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEDGER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Kernel Orchestrator API Server");

    let config = load_config()?;

    let repository: Arc<dyn OperationRepository> = match config.storage_backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; operations are lost on restart");
            Arc::new(MemoryStorage::new())
        }
        StorageBackend::Postgres => {
            let url = config
                .postgres_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("POSTGRES_URL is required for the postgres backend"))?;
            info!("Connecting to PostgreSQL at {}", mask_password(&url));
            Arc::new(PostgresStorage::new(&PostgresConfig { url }).await?)
        }
    };

    let witness: Arc<dyn WitnessClient> = match &config.witness_url {
        Some(url) => {
            info!("Witness ledger at {}", url);
            Arc::new(HttpLedgerClient::new(url.clone(), LEDGER_REQUEST_TIMEOUT)?)
        }
        None => {
            warn!("WITNESS_URL not set, using simulated witness ledger");
            Arc::new(SimulatedWitness::default())
        }
    };
    let settlement: Arc<dyn SettlementClient> = match &config.settlement_url {
        Some(url) => {
            info!("Settlement ledger at {}", url);
            Arc::new(HttpLedgerClient::new(url.clone(), LEDGER_REQUEST_TIMEOUT)?)
        }
        None => {
            warn!("SETTLEMENT_URL not set, using simulated settlement ledger");
            Arc::new(SimulatedSettlement::default())
        }
    };
    let contract: Arc<dyn ContractClient> = match &config.contract_url {
        Some(url) => {
            info!("Contract ledger at {}", url);
            Arc::new(HttpLedgerClient::new(url.clone(), LEDGER_REQUEST_TIMEOUT)?)
        }
        None => Arc::new(SimulatedContract::default()),
    };

    let orchestration_config = OrchestrationConfigBuilder::new()
        .max_concurrent_ops(config.max_concurrent_ops)
        .build();

    let timing = Arc::new(TimingCoordinator::new(
        orchestration_config.sync_refresh_interval,
    ));
    let timing_handle = Arc::clone(&timing).start();
    info!("Timing coordinator started");

    let orchestrator = OperationOrchestratorBuilder::new()
        .with_config(orchestration_config.clone())
        .with_repository(Arc::clone(&repository))
        .with_timing(Arc::clone(&timing))
        .with_witness(witness)
        .with_settlement(settlement)
        .with_contract(contract)
        .with_notifier(Arc::new(HttpCallbackNotifier::new(CALLBACK_TIMEOUT)?))
        .build()?;
    let orchestrator_handle = Arc::clone(&orchestrator).start();
    info!("Operation orchestrator started");

    let sweeper = if config.enable_ttl_sweep {
        let sweeper = TtlSweeperBuilder::new()
            .with_config(orchestration_config)
            .with_repository(Arc::clone(&repository))
            .with_state_manager(Arc::clone(orchestrator.state_manager()))
            .with_metadata_registry(Arc::clone(orchestrator.metadata_registry()))
            .build()?;
        let handle = Arc::clone(&sweeper).start();
        info!("TTL sweeper started");
        Some((sweeper, handle))
    } else {
        warn!("TTL sweep disabled - expired operations will not be cancelled");
        None
    };

    let addr: SocketAddr = config.listen_addr.parse()?;

    info!("Server configuration:");
    info!("  Listen Address: {}", addr);
    info!("  Storage: {:?}", config.storage_backend);
    info!("  Max concurrent operations: {}", config.max_concurrent_ops);

    let state = AppState::new(Arc::clone(&orchestrator));
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state, addr).await {
            error!("Server error: {}", e);
        }
    });

    info!("Server running. Press Ctrl+C to shutdown.");
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    info!("Shutting down orchestration services...");
    orchestrator.shutdown().await;
    timing.shutdown().await;

    let shutdown_timeout = Duration::from_secs(10);
    tokio::select! {
        _ = orchestrator_handle => info!("Pipeline dispatcher stopped"),
        _ = tokio::time::sleep(shutdown_timeout) => warn!("Pipeline dispatcher shutdown timed out"),
    }
    if let Some((sweeper, handle)) = sweeper {
        sweeper.shutdown().await;
        tokio::select! {
            _ = handle => info!("TTL sweeper stopped"),
            _ = tokio::time::sleep(shutdown_timeout) => warn!("TTL sweeper shutdown timed out"),
        }
    }
    tokio::select! {
        _ = timing_handle => info!("Timing coordinator stopped"),
        _ = tokio::time::sleep(shutdown_timeout) => warn!("Timing coordinator shutdown timed out"),
    }

    server_handle.abort();
    info!("API server stopped");

    info!("Shutdown complete");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug)]
struct Config {
    listen_addr: String,
    storage_backend: StorageBackend,
    postgres_url: Option<String>,
    witness_url: Option<String>,
    settlement_url: Option<String>,
    contract_url: Option<String>,
    enable_ttl_sweep: bool,
    max_concurrent_ops: usize,
}

fn load_config() -> Result<Config> {
    let listen_addr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let storage_backend = match std::env::var("STORAGE_BACKEND")
        .unwrap_or_else(|_| "memory".to_string())
        .to_lowercase()
        .as_str()
    {
        "memory" => StorageBackend::Memory,
        "postgres" => StorageBackend::Postgres,
        other => anyhow::bail!("Unknown STORAGE_BACKEND '{}', expected memory or postgres", other),
    };

    let enable_ttl_sweep = std::env::var("ENABLE_TTL_SWEEP")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let max_concurrent_ops = std::env::var("MAX_CONCURRENT_OPS")
        .unwrap_or_else(|_| "10".to_string())
        .parse::<usize>()?;

    Ok(Config {
        listen_addr,
        storage_backend,
        postgres_url: non_empty_var("POSTGRES_URL"),
        witness_url: non_empty_var("WITNESS_URL"),
        settlement_url: non_empty_var("SETTLEMENT_URL"),
        contract_url: non_empty_var("CONTRACT_URL"),
        enable_ttl_sweep,
        max_concurrent_ops,
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Hide the password in a connection URL before logging it.
fn mask_password(url: &str) -> String {
    if let Some(at) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let credentials = &url[scheme_end + 3..at];
            if let Some(colon) = credentials.find(':') {
                return format!(
                    "{}{}:****{}",
                    &url[..scheme_end + 3],
                    &credentials[..colon],
                    &url[at..]
                );
            }
        }
    }
    url.to_string()
}
