//! `sandpool` binary: serves the sandbox orchestrator HTTP API.

use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sandpool::{
    config::{OrchestratorConfig, DEFAULT_SERVER_PORT},
    history::HistoryStore,
    orchestration::{CleanupScheduler, Orchestrator, PoolMaintainer},
    pool::HttpProvider,
    server::{create_router, ServerState},
    utils::env_opt,
    SandpoolResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "sandpool")]
#[command(about = "Orchestrator for ephemeral compute sandboxes with warm-pool acquisition")]
struct SandpoolArgs {
    #[command(subcommand)]
    subcommand: Option<SandpoolSubcommand>,
}

#[derive(Subcommand, Debug)]
enum SandpoolSubcommand {
    /// Start the orchestrator HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
        port: u16,

        /// Base URL of the sandbox provisioner API
        #[arg(long)]
        provider_url: Option<String>,
    },
}

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> SandpoolResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = SandpoolArgs::parse();
    match args.subcommand {
        Some(SandpoolSubcommand::Serve { port, provider_url }) => {
            serve(port, provider_url).await?;
        }
        None => {
            use clap::CommandFactory;
            SandpoolArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn serve(port: u16, provider_url: Option<String>) -> SandpoolResult<()> {
    let config = OrchestratorConfig::from_env()?;

    let provider_url = provider_url
        .or_else(|| env_opt("SANDPOOL_PROVIDER_URL"))
        .unwrap_or_else(|| "http://127.0.0.1:9000".to_string());
    let provider_token = env_opt("SANDPOOL_PROVIDER_TOKEN");
    let provider = Arc::new(HttpProvider::new(&provider_url, provider_token)?);
    tracing::info!(provider_url = %provider_url, "using sandbox provisioner");

    let history = HistoryStore::open_default().await?;
    let orchestrator = Arc::new(Orchestrator::new(config, provider, history));

    let cleanup = CleanupScheduler::spawn(
        orchestrator.clone(),
        orchestrator.config().cleanup_interval(),
    );
    let maintainer = PoolMaintainer::spawn(
        orchestrator.clone(),
        orchestrator.config().reconcile_interval(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("server listening on {}", addr);

    let app = create_router(ServerState::new(orchestrator));
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the background loops before exiting so in-flight sweeps finish.
    cleanup.shutdown().await;
    maintainer.shutdown().await;
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown requested");
}
