use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::connection;
use crate::error::AuthError;

/// Browsers cannot set headers on websocket upgrades, so the bearer
/// credential travels as `?token=`.
#[derive(Debug, Deserialize)]
pub struct SignalingQuery {
    pub token: Option<String>,
}

/// GET /ws/signaling/:room_id?token=JWT
///
/// The credential is verified before the upgrade; a rejected request gets a
/// 401 and no connection is ever created.
pub async fn signaling_upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<SignalingQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if room_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "room id must not be empty").into_response();
    }

    let identity = match query
        .token
        .as_deref()
        .ok_or(AuthError::MissingToken)
        .and_then(|token| state.verifier.verify(token))
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(room = %room_id, error = %e, "Signaling upgrade rejected");
            return e.into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "websocket upgrade required").into_response();
    };

    tracing::info!(room = %room_id, identity = %identity, "Signaling connection authenticated");
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, identity, state))
}

async fn handle_socket(socket: WebSocket, room_id: String, identity: String, state: AppState) {
    let (connection, inbound) = connection::attach(socket, state.connection);
    state.router.run(&room_id, &identity, connection, inbound).await;
    tracing::info!(room = %room_id, identity = %identity, "Signaling connection finished");
}
