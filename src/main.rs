use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use uplink::agent::{AgentConfig, AgentSender};
use uplink::api::{create_router, AppState};
use uplink::cli::{self, Cli, Commands};
use uplink::config::{AppConfig, LoggingConfig};
use uplink::error::{Result, UplinkError};
use uplink::orchestrator::TransferOrchestrator;
use uplink::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            run_server(&config).await?;
        }
        Commands::Agent {
            server,
            agent_id,
            chunk_size,
        } => {
            init_logging();
            let sender = AgentSender::new(AgentConfig {
                server_url: server,
                agent_id,
                chunk_size,
            });
            tokio::select! {
                result = sender.run() => result?,
                _ = shutdown_signal() => info!("shutting down"),
            }
        }
        Commands::Download {
            server,
            client_id,
            file_path,
            wait,
        } => {
            init_logging_simple();
            cli::trigger_download(&server, &client_id, &file_path, wait).await?;
        }
        Commands::Clients { server } => {
            init_logging_simple();
            cli::list_clients(&server).await?;
        }
    }

    Ok(())
}

async fn run_server(config_dir: &str) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    init_server_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {e}");
        }
        return Err(UplinkError::Internal("invalid configuration".to_string()));
    }

    let download_dir = PathBuf::from(&config.server.download_dir);
    tokio::fs::create_dir_all(&download_dir).await?;

    let (registry, registry_events) = ConnectionRegistry::new();
    let registry = Arc::new(registry);
    let orchestrator = TransferOrchestrator::new(
        Arc::clone(&registry),
        registry_events,
        config.transfer.clone(),
        download_dir.clone(),
    );

    let state = AppState::new(registry, orchestrator);
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("uplink server listening on http://{addr}");
    info!("agent uplink endpoint: ws://{addr}/ws");
    info!("downloads will be saved to {}", download_dir.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_server_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},uplink=debug", config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,uplink=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn init_logging_simple() {
    // Minimal logging for one-shot CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
