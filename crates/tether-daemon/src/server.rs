//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the router for the REST API and event stream
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Session
        .route("/api/status", get(api::get_status))
        .route("/api/config", get(api::get_config))
        .route("/api/persistence", put(api::set_persistence))
        .route("/api/persistence/records", get(api::list_records))
        // Trackables
        .route("/api/trackables/{kind}", get(api::list_trackables))
        .route("/api/trackables/{kind}/{id}", get(api::get_trackable))
        // Anchors by stable id
        .route("/api/anchors", post(api::create_anchor))
        .route("/api/anchors/{id}", delete(api::destroy_anchor))
        .route(
            "/api/anchors/{id}/persist",
            post(api::persist_anchor)
                .get(api::anchor_persist_state)
                .delete(api::unpersist_anchor),
        )
        // Anchors by durable id
        .route("/api/durable", get(api::list_durable))
        .route(
            "/api/durable/{id}",
            get(api::durable_state).delete(api::unpersist_durable),
        )
        .route("/api/durable/{id}/load", post(api::load_durable))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the frame loop and serve until the listener fails
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    let frame_loop = state.spawn_frame_loop();

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    let result = axum::serve(listener, app).await;

    frame_loop.abort();
    result?;
    Ok(())
}
