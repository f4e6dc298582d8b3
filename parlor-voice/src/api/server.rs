//! HTTP server setup and routing

use crate::context::VoiceContext;
use crate::error::{Error, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub voice: VoiceContext,
}

impl AppContext {
    pub fn new(voice: VoiceContext) -> Self {
        Self { voice }
    }
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Speech
        .route("/speak", post(super::handlers::speak))
        // Playback control
        .route("/stats", get(super::handlers::get_stats))
        .route("/stop", post(super::handlers::stop_all))
        .route("/channels/:channel/stop", post(super::handlers::stop_channel))
        .route("/channels/:channel/mix", post(super::handlers::set_channel_mix))
        .route("/volume", get(super::handlers::get_volume))
        .route("/volume", post(super::handlers::set_volume))
        .route("/enabled", post(super::handlers::set_enabled))
        // Scheduling
        .route("/ceiling", post(super::handlers::set_ceiling))
        .route("/participants", post(super::handlers::set_participants))
        // Synthesis backends
        .route("/backends", get(super::handlers::list_backends))
        .route("/backends", post(super::handlers::register_backend))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `bind_addr` until `shutdown` is cancelled
pub async fn run(ctx: AppContext, bind_addr: &str, shutdown: CancellationToken) -> Result<()> {
    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind to {}: {}", bind_addr, e)))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("Listener has no address: {}", e)))?;
    info!("HTTP API listening on {}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("HTTP API stopped");
    Ok(())
}
