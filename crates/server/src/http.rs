//! HTTP routes
//!
//! `POST /voice/incoming` answers the telephony provider's webhook with the
//! control document that connects the call to the media stream;
//! `GET /voice/stream` upgrades to the media-stream WebSocket.

use axum::{
    extract::{Form, State, WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use agri_voice_telephony::connect_stream_twiml;

use crate::call;
use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/voice/incoming", post(incoming_call))
        .route("/voice/stream", get(stream_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Provider webhook body (URL-encoded form). Only the fields worth logging
/// are pulled out.
#[derive(Debug, Deserialize)]
pub struct IncomingCallForm {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
}

async fn incoming_call(
    State(state): State<AppState>,
    Form(form): Form<IncomingCallForm>,
) -> impl IntoResponse {
    tracing::info!(call_sid = ?form.call_sid, from = ?form.from, "incoming call");
    let ws_url = format!("wss://{}/voice/stream", state.settings.server.base_url);
    (
        [(header::CONTENT_TYPE, "text/xml")],
        connect_stream_twiml(&ws_url),
    )
}

async fn stream_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| call::handle_socket(socket, state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
