//! EmberKV server binary.
//!
//! Parses the command line, sets up logging, binds the listener and serves
//! until Ctrl+C.

use anyhow::Context;
use clap::builder::TypedValueParser;
use clap::Parser;
use emberkv::server::{Server, ServerConfig};
use emberkv::storage::DEFAULT_MAX_MEMORY_MB;
use emberkv::{DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CLIENTS, DEFAULT_PORT};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emberkv", version, about = "In-memory key-value store server")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "EMBERKV_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "EMBERKV_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connections served at once
    #[arg(
        long,
        env = "EMBERKV_MAX_CLIENTS",
        default_value_t = DEFAULT_MAX_CLIENTS,
        value_parser = clap::value_parser!(u32).range(1..).map(|n| n as usize)
    )]
    max_clients: usize,

    /// Memory budget of the store, in megabytes
    #[arg(long, env = "EMBERKV_MAX_MEMORY_MB", default_value_t = DEFAULT_MAX_MEMORY_MB)]
    max_memory_mb: usize,

    /// Seconds a connection may stay idle before it is closed
    #[arg(long, env = "EMBERKV_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    timeout: u64,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            max_clients: args.max_clients,
            max_memory_mb: args.max_memory_mb,
            idle_timeout: Duration::from_secs(args.timeout),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ServerConfig::from(args);
    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    let addr = server.local_addr()?;
    info!(
        version = emberkv::VERSION,
        addr = %addr,
        "EmberKV ready to accept connections"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await;

    info!("Server shutdown complete");
    Ok(())
}
