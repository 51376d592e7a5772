//! Error types for the media server.

use mediarelay_core::StreamError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required configuration value
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind HTTP server
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    HttpBindFailed {
        /// Address that failed to bind
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to publish the media directory
    #[error("Failed to load media from {path}: {source}")]
    MediaLoadFailed {
        /// Directory that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Streaming engine could not be built
    #[error("Streaming engine error: {0}")]
    Engine(#[from] StreamError),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}
