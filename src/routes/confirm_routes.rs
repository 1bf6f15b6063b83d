use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    confirmation::{self, ConfirmIdentity, ConfirmOutcome},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, ConfirmationChannel},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/visits/confirm", post(confirm_with_token))
        .route("/visits/{visit_id}/confirm", post(confirm_at_desk))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct TokenConfirmRequest {
    pub token: String,
    pub channel: String,
    pub channel_user_id: Option<String>,
    pub patient_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeskConfirmRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub success: bool,
    pub visit_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_numbers: Option<Vec<i32>>,
}

impl From<ConfirmOutcome> for ConfirmResponse {
    fn from(o: ConfirmOutcome) -> Self {
        ConfirmResponse {
            success: true,
            visit_id: o.visit_id,
            status: o.status.as_str().to_string(),
            queue_numbers: o.queue_numbers,
        }
    }
}

/* ============================================================
   POST /visits/confirm  (telegram + pwa bindings)
   ============================================================ */

pub async fn confirm_with_token(
    State(state): State<AppState>,
    Json(req): Json<TokenConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "token is required".into(),
        ));
    }

    let channel = ConfirmationChannel::parse(&req.channel).map_err(ApiError::from)?;

    let identity = match channel {
        ConfirmationChannel::Telegram => {
            let channel_user_id = req.channel_user_id.as_deref().map(str::trim).unwrap_or("");
            if channel_user_id.is_empty() {
                return Err(ApiError::BadRequest(
                    "VALIDATION_ERROR",
                    "channel_user_id is required for the telegram channel".into(),
                ));
            }
            ConfirmIdentity::Telegram {
                channel_user_id: channel_user_id.to_string(),
            }
        }
        ConfirmationChannel::Pwa => {
            let patient_phone = req.patient_phone.as_deref().map(str::trim).unwrap_or("");
            if patient_phone.is_empty() {
                return Err(ApiError::BadRequest(
                    "VALIDATION_ERROR",
                    "patient_phone is required for the pwa channel".into(),
                ));
            }
            ConfirmIdentity::Pwa {
                patient_phone: patient_phone.to_string(),
            }
        }
        ConfirmationChannel::Phone => {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "phone bookings are confirmed at the registrar desk".into(),
            ));
        }
    };

    let outcome = confirmation::confirm_by_token(&state, token, identity)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(outcome.into()))
}

/* ============================================================
   POST /visits/{visit_id}/confirm  (registrar binding)
   ============================================================ */

pub async fn confirm_at_desk(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(visit_id): Path<Uuid>,
    Json(req): Json<DeskConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    if !auth.role.can_operate_queue() {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/registrar can confirm at the desk".into(),
        ));
    }

    if let Some(notes) = req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        tracing::info!(%visit_id, registrar = %auth.username, notes, "desk confirmation note");
    }

    let outcome = confirmation::confirm_by_visit_id(&state, visit_id, &auth.username)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(outcome.into()))
}
