//! HTTP front end for the mediarelay streaming engine.
//!
//! Serves ranged media responses from a [`ByteStreamer`](mediarelay_core::ByteStreamer)
//! over axum.
//!
//! # Architecture
//!
//! - `config`: CLI and environment configuration
//! - `server`: shared state and the listener lifecycle
//! - `http`: router and handlers for `/stream`, `/dl`, `/status` and `/metrics`
//! - `metrics`: Prometheus gauges refreshed from engine snapshots
//!
//! # Example
//!
//! ```no_run
//! use mediarelay_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::from_args();
//!     config.validate()?;
//!
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod server;

pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
pub use metrics::StreamMetrics;
pub use server::{AppState, Server};
