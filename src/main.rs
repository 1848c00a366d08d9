//! flightrpc - Flight information RPC server
//!
//! A UDP request/reply server with at-most-once semantics and seat update callbacks.

use clap::Parser;
use flightrpc_flights::{routes, FlightService, FlightStore};
use flightrpc_server::{Config, InvocationSemantics, Server, ServerConfig, SubscriptionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flightrpc")]
#[command(about = "Flight information RPC server over UDP")]
#[command(version)]
struct Args {
    /// Use at-most-once invocation semantics (false for at-least-once)
    #[arg(long, value_name = "BOOL")]
    amo: Option<bool>,

    /// YAML config file (overrides FLIGHTRPC_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Host name or IP address to bind to
    #[arg(long)]
    host: Option<String>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Config file, then env, then CLI flags
    let mut config = match &args.config {
        Some(path) => {
            let mut config = Config::from_file(path).map_err(|e| {
                tracing::error!("Failed to load config: {}", e);
                e
            })?;
            config.apply_env_overrides();
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => match Config::load() {
            Ok(config) => config,
            Err(e) => {
                if std::env::var("FLIGHTRPC_CONFIG").is_ok() {
                    tracing::error!("Failed to load config: {}", e);
                    return Err(e.into());
                }
                tracing::info!("Using default configuration");
                Config::from_env()
            }
        },
    };

    if let Some(amo) = args.amo {
        config.semantics = InvocationSemantics::from_at_most_once(amo);
    }
    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    config.validate()?;

    tracing::info!("Starting flightrpc server");
    tracing::info!(
        "  Bind address: {}:{}",
        config.network.host,
        config.network.port
    );
    tracing::info!("  Invocation semantics: {}", config.semantics);
    if config.semantics.is_at_most_once() {
        tracing::info!(
            "  Duplicate retention: {}s (replay: {})",
            config.dedup.retention_secs,
            config.dedup.replay_responses
        );
    }

    let store = Arc::new(FlightStore::seeded());
    tracing::info!("  Flights loaded: {}", store.len());

    let service = Arc::new(FlightService::new(
        store,
        SubscriptionRegistry::new(&config.callback),
    ));

    let server_config = ServerConfig::from_config(&config)?;
    let server = Arc::new(Server::bind(server_config, routes(service)).await?);

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
