//! Chainer CLI — an MCP aggregator that chains tool calls across servers.
//!
//! Speaks MCP over stdio to its client and drives the configured downstream
//! MCP servers as child processes. All logging goes to stderr; stdout is
//! reserved for the protocol.

use anyhow::{Context, Result};
use chainer_mcp::{ChainerConfig, ToolRegistry};
use chainer_server::UpstreamServer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chainer", version, about = "Chain MCP tool calls across servers")]
struct Cli {
    /// Path to the JSON config file listing downstream MCP servers.
    /// Falls back to $CONFIG_PATH; without either, serves with an empty
    /// registry.
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));
    let config = match &config_path {
        Some(path) => ChainerConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => {
            tracing::warn!("no config file given; serving with an empty tool registry");
            ChainerConfig::default()
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        servers = config.mcp_servers.len(),
        "starting"
    );

    let registry = Arc::new(ToolRegistry::new());
    let aliases = registry.discover(&config).await;
    tracing::info!(tools = aliases.len(), "startup discovery complete");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    UpstreamServer::new(registry, Arc::new(config))
        .serve(shutdown)
        .await
        .context("upstream transport failure")?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Cancel the token on SIGINT or, on unix, SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received ctrl-c");
        }
        shutdown.cancel();
    });
}
