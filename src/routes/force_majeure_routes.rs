use axum::{
    Json, Router,
    extract::State,
    routing::post,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, RefundType},
    queue::force_majeure::{self, EntryOutcome},
};

fn ensure_force_majeure(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role.can_force_majeure() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can run force-majeure operations".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/force-majeure/transfer", post(transfer))
        .route("/force-majeure/cancel", post(cancel))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<EntryOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub specialist_employee_id: Uuid,
    /// Defaults to today.
    pub day: Option<NaiveDate>,
    /// Explicit entries; when omitted, every waiting entry of the day.
    pub entry_ids: Option<Vec<Uuid>>,
    pub notify_patients: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub specialist_employee_id: Uuid,
    pub day: Option<NaiveDate>,
    pub entry_ids: Option<Vec<Uuid>>,
    pub refund_type: String,
}

/* ============================================================
   POST /force-majeure/transfer
   ============================================================ */

pub async fn transfer(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<TransferRequest>,
) -> Result<Json<ApiOk<BatchResponse>>, ApiError> {
    ensure_force_majeure(&auth)?;
    let day = req.day.unwrap_or_else(|| Utc::now().date_naive());

    let results = force_majeure::transfer_to_tomorrow(
        &state,
        day,
        req.specialist_employee_id,
        req.entry_ids,
        req.notify_patients.unwrap_or(true),
    )
    .await
    .map_err(ApiError::from)?;

    tracing::info!(
        %day,
        specialist = %req.specialist_employee_id,
        operator = %auth.username,
        total = results.len(),
        "force-majeure transfer finished"
    );

    Ok(Json(ApiOk {
        data: BatchResponse { results },
    }))
}

/* ============================================================
   POST /force-majeure/cancel
   ============================================================ */

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiOk<BatchResponse>>, ApiError> {
    ensure_force_majeure(&auth)?;
    let day = req.day.unwrap_or_else(|| Utc::now().date_naive());
    let refund_type = RefundType::parse(&req.refund_type).map_err(ApiError::from)?;

    let results = force_majeure::cancel_with_refund(
        &state,
        day,
        req.specialist_employee_id,
        req.entry_ids,
        refund_type,
    )
    .await
    .map_err(ApiError::from)?;

    tracing::info!(
        %day,
        specialist = %req.specialist_employee_id,
        operator = %auth.username,
        total = results.len(),
        "force-majeure cancellation finished"
    );

    Ok(Json(ApiOk {
        data: BatchResponse { results },
    }))
}
