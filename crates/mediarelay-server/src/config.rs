//! Server configuration management.
//!
//! Every option can be given on the command line or through a `MEDIARELAY_*`
//! environment variable.
//!
//! # Example
//!
//! ```no_run
//! use mediarelay_server::ServerConfig;
//!
//! let config = ServerConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("HTTP server will bind to: {}", config.http_bind);
//! println!("Serving media from: {}", config.media_dir.display());
//! ```

use crate::error::ConfigError;
use clap::Parser;
use mediarelay_core::{DcId, StreamerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mediarelay",
    about = "Ranged HTTP streaming for remotely stored media",
    version
)]
pub struct ServerConfig {
    /// HTTP bind address
    #[arg(long, env = "MEDIARELAY_HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,

    /// Directory whose files are published, one file id per file name
    #[arg(long, env = "MEDIARELAY_MEDIA_DIR", default_value = "./media")]
    pub media_dir: PathBuf,

    /// Number of upstream connections to balance streams across
    #[arg(long, env = "MEDIARELAY_CONNECTIONS", default_value_t = 1)]
    pub connections: usize,

    /// Data center the media is stored on
    #[arg(long, env = "MEDIARELAY_DC", default_value_t = 2)]
    pub dc: DcId,

    /// Base URL used in generated links (defaults to the bind address)
    #[arg(long, env = "MEDIARELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Bytes fetched from the upstream per request
    #[arg(long, env = "MEDIARELAY_CHUNK_SIZE", default_value_t = 1024 * 1024)]
    pub chunk_size: u64,

    /// Seconds between full descriptor cache sweeps
    #[arg(long, env = "MEDIARELAY_CACHE_CLEAN_SECS", default_value_t = 30 * 60)]
    pub cache_clean_secs: u64,

    /// Flood waits slept through before a request fails
    #[arg(long, env = "MEDIARELAY_MAX_FLOOD_WAITS", default_value_t = 3)]
    pub max_flood_waits: u32,
}

impl ServerConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Engine settings derived from the server options.
    #[must_use]
    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_cache_clean_interval(Duration::from_secs(self.cache_clean_secs))
            .with_max_flood_waits(self.max_flood_waits)
    }

    /// Base of generated stream and download links, without a trailing slash.
    #[must_use]
    pub fn public_base(&self) -> String {
        self.public_url.as_deref().map_or_else(
            || format!("http://{}", self.http_bind),
            |url| url.trim_end_matches('/').to_string(),
        )
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The media directory doesn't exist
    /// - No upstream connections are requested
    /// - The chunk size or sweep interval is rejected by the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.media_dir.is_dir() {
            return Err(ConfigError::MissingRequired(format!(
                "media directory not found: {}",
                self.media_dir.display()
            )));
        }

        if self.connections == 0 {
            return Err(ConfigError::Invalid(
                "at least one upstream connection is required".to_string(),
            ));
        }

        self.streamer_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
