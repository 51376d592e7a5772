//! mediarelay binary entry point.
//!
//! Thin wrapper around the mediarelay-server library that initializes
//! logging, parses and validates configuration, and runs the server.

use anyhow::Result;
use mediarelay_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_args();

    tracing::info!(
        "Configuration loaded: HTTP={}, media={:?}, connections={}",
        config.http_bind,
        config.media_dir,
        config.connections
    );

    config.validate()?;

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
