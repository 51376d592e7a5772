//! Server state management and orchestration.
//!
//! Owns the streaming engine shared by every HTTP handler and drives the
//! listener until a shutdown signal arrives.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::metrics::StreamMetrics;
use mediarelay_core::{ByteStreamer, MemoryNetwork, StreamLink};
use std::sync::Arc;

/// Shared application state for HTTP handlers.
pub struct AppState {
    /// Streaming engine
    streamer: ByteStreamer,

    /// Prometheus exporter
    metrics: StreamMetrics,

    /// Base of generated links
    public_base: String,
}

impl AppState {
    /// Publish the configured media directory and start the engine.
    ///
    /// Must be called from within a tokio runtime, which hosts the cache
    /// janitor.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the media directory cannot be read or the
    /// engine rejects its configuration.
    pub async fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        tracing::info!("Loading media from {:?}", config.media_dir);

        let network = MemoryNetwork::new();
        let published = network
            .load_dir(&config.media_dir, config.dc)
            .await
            .map_err(|source| ServerError::MediaLoadFailed {
                path: config.media_dir.clone(),
                source,
            })?;

        let pool = network.pool(config.connections, config.dc)?;
        let streamer = ByteStreamer::new(pool, config.streamer_config())?.with_janitor();
        let state = Self::with_streamer(streamer, config.public_base())?;

        tracing::info!(
            "Published {} files over {} upstream connections",
            published.len(),
            config.connections
        );
        for file_id in &published {
            let link = state.link(file_id);
            tracing::debug!("{file_id}: {} | {}", link.stream_url, link.download_url);
        }

        Ok(state)
    }

    /// Wrap an already built engine.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if metrics cannot be registered.
    pub fn with_streamer(
        streamer: ByteStreamer,
        public_base: impl Into<String>,
    ) -> Result<Self, ServerError> {
        Ok(Self {
            streamer,
            metrics: StreamMetrics::new()?,
            public_base: public_base.into(),
        })
    }

    /// Get reference to the streaming engine.
    #[must_use]
    pub const fn streamer(&self) -> &ByteStreamer {
        &self.streamer
    }

    /// Get reference to the metrics exporter.
    #[must_use]
    pub const fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Get the base URL of generated links.
    #[must_use]
    pub fn public_base(&self) -> &str {
        &self.public_base
    }

    /// Stream and download links for `file_id`.
    #[must_use]
    pub fn link(&self, file_id: &str) -> StreamLink {
        StreamLink::new(&self.public_base, file_id)
    }
}

/// Server orchestration.
pub struct Server {
    /// Shared application state
    state: Arc<AppState>,
    /// Server configuration
    config: ServerConfig,
}

impl Server {
    /// Create new server with configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the application state cannot be built.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let state = AppState::new(&config).await?;

        Ok(Self {
            state: Arc::new(state),
            config,
        })
    }

    /// Serve HTTP until interrupted, then stop the engine.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the listener errors out.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Starting mediarelay server");
        tracing::info!("HTTP server binding to: {}", self.config.http_bind);
        tracing::info!("Public links under: {}", self.state.public_base());

        crate::http::start_server(
            self.config.http_bind,
            Arc::clone(&self.state),
            shutdown_signal(),
        )
        .await?;

        tracing::info!("Shutdown signal received, stopping engine");
        self.state.streamer().shutdown().await;

        Ok(())
    }

    /// Get shared application state.
    #[must_use]
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
