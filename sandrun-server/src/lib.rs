//! The browser-facing streaming endpoint for sandrun.
//!
//! One WebSocket route carries the whole protocol: the client sends a single
//! request frame, the server streams back execution events as JSON frames,
//! and the socket closes when the execution is over. Everything else here is
//! plumbing around that route.

use axum::Router;
use axum::routing::get;
use sandrun_engine::Engine;
use tower_http::trace::TraceLayer;

pub mod ws;

/// The shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The execution engine.
    pub engine: Engine,
}

/// Builds the application router.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/ws/execute", get(ws::execute))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}
