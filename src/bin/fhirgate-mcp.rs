//! FHIRGate MCP Server - Main binary

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fhirgate_mcp::transport::{StdioTransport, Transport};
use fhirgate_mcp::{HttpFhirClient, McpServer, ServerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fhirgate-mcp")]
#[command(about = "MCP server exposing clinical-record tools over a FHIR repository")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for protocol messages
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    info!("Starting FHIRGate MCP Server v{}", fhirgate_mcp::VERSION);

    let config = ServerConfig {
        log_level: cli.log_level,
        ..ServerConfig::from_env()
    };
    info!("FHIR repository: {}", config.base_url);

    let client = Arc::new(HttpFhirClient::new(&config));
    let server = McpServer::new(config, client);
    let transport = StdioTransport::new();

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(_) => info!("received Ctrl+C, shutting down"),
            Err(err) => error!("unable to listen for shutdown signal: {err}"),
        }
    };

    tokio::select! {
        result = transport.start(Box::new(server)) => {
            match result {
                Ok(_) => info!("stdio transport completed"),
                Err(e) => error!("stdio transport error: {e}"),
            }
        }
        _ = shutdown_signal => {
            if let Err(e) = transport.shutdown().await {
                error!("error during transport shutdown: {e}");
            }
        }
    }

    info!("FHIRGate MCP Server shutdown complete");
    Ok(())
}
