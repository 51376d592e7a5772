//! HTTP server implementation using axum.

use crate::error::ServerError;
use crate::server::AppState;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;

/// Create HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/stream/{file_id}",
            axum::routing::get(handlers::handle_stream),
        )
        .route("/dl/{file_id}", axum::routing::get(handlers::handle_download))
        .route("/status", axum::routing::get(handlers::handle_status))
        .route("/metrics", axum::routing::get(handlers::handle_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start HTTP server, returning once `shutdown` resolves and open
/// connections have drained.
///
/// # Errors
///
/// Returns `ServerError` if the server fails to bind or encounters a runtime error.
pub async fn start_server<F>(
    bind_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::HttpBindFailed {
            addr: bind_addr,
            source,
        })?;

    tracing::info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Shutdown(format!("HTTP server error: {e}")))?;

    Ok(())
}
