//! Prometheus recorder, metric names and the request-tracking middleware.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup, before
/// anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text format from `handle`.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// HTTP requests served (counter, labels: method, path, status).
pub const HTTP_REQUESTS_TOTAL: &str = "signalroom_http_requests_total";
/// HTTP request duration seconds (histogram, labels: method, path).
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "signalroom_http_request_duration_seconds";
/// Signaling sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "signalroom_ws_connections_total";
/// Signaling sessions ended (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "signalroom_ws_disconnections_total";
/// Signaling sessions currently running (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "signalroom_ws_connections_active";
/// Rooms with at least one member (gauge).
pub const ROOMS_ACTIVE: &str = "signalroom_rooms_active";
/// Announced joins (counter).
pub const ROOM_JOINS_TOTAL: &str = "signalroom_room_joins_total";
/// Announced departures, including reaped members (counter).
pub const ROOM_LEAVES_TOTAL: &str = "signalroom_room_leaves_total";
/// Members removed because a send to them failed (counter).
pub const RELAY_REAPED_TOTAL: &str = "signalroom_relay_reaped_total";

/// Count and time every routed request. Paths are labelled with the route
/// template so room ids never become label values.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path)
        .record(start.elapsed().as_secs_f64());

    response
}
