use axum::http::header;
use axum::response::IntoResponse;
use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::app_state::AppState;
use crate::handler;
use crate::metrics;

/// Build the HTTP surface. Files under `static_dir`, when given, are served
/// for every path no route claims. `/metrics` exists only when the state
/// carries a Prometheus handle.
pub fn build_router(state: AppState, static_dir: Option<&str>) -> Router {
    let router = Router::new()
        .route("/ws/signaling/:room_id", get(handler::signaling_upgrade))
        .route("/health", get(health));

    let router = if state.metrics.is_some() {
        router.route("/metrics", get(prometheus_metrics))
    } else {
        router
    };
    let router = router.route_layer(middleware::from_fn(metrics::track_requests));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "rooms": state.registry.room_count(),
        "connections": state.registry.connection_count(),
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(metrics::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
