use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;

use crate::{
    display::broadcaster::Announcement,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, OkData, OkResponse},
};

/// Push channel for the passive waiting-room screens.
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/display/{board_id}", get(display_socket))
}

pub fn announce_router() -> Router<AppState> {
    Router::new().route("/displays/{board_id}/announce", post(announce))
}

/* ============================================================
   GET /ws/display/{board_id}
   ============================================================ */

pub async fn display_socket(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_display_socket(socket, state, board_id))
}

async fn run_display_socket(mut socket: WebSocket, state: AppState, board_id: String) {
    // The first queued message is always the board's last snapshot.
    let mut rx = state.displays.subscribe(&board_id);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if socket.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Displays are passive; pings and stray frames are ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Dropping rx is enough: the hub prunes the sender on its next write.
    tracing::debug!(board_id, "display disconnected");
}

/* ============================================================
   POST /displays/{board_id}/announce
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AnnounceRequest {
    pub text: String,
    pub voice_text: Option<String>,
    pub display_duration: Option<i64>,
    pub sound_enabled: Option<bool>,
}

pub async fn announce(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(board_id): Path<String>,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if !auth.role.can_operate_queue() {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/registrar can post announcements".into(),
        ));
    }
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "text is required".into(),
        ));
    }

    state.displays.publish_announcement(
        &board_id,
        Announcement { text: text.to_string() },
        req.display_duration.unwrap_or(state.display_call_seconds),
        req.sound_enabled.unwrap_or(false),
        req.voice_text,
    );

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
