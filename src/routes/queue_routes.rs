use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    display::broadcaster::PatientCall,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, DailyQueueRow, EntrySource, EntryStatus, QueueEntryRow},
    queue::registry::{self, NewEntry, SweepTicket},
};

fn ensure_operate(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role.can_operate_queue() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/registrar can operate queues".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queues/open", post(open_queue))
        .route("/queues/close", post(close_queue))
        .route("/queues/entries", post(add_walk_in))
        .route("/queues/call-next", post(call_next))
        .route("/queues/entries/{queue_entry_id}/start", post(start_service))
        .route("/queues/entries/{queue_entry_id}/complete", post(complete_service))
        .route("/queues/entries/{queue_entry_id}/no-show", post(mark_no_show))
        .route("/queues/status", get(queue_status))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct BucketSelector {
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    /// Defaults to today.
    pub day: Option<NaiveDate>,
}

impl BucketSelector {
    fn day(&self) -> NaiveDate {
        self.day.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn tag(&self) -> Result<&str, ApiError> {
        let tag = self.queue_tag.trim();
        if tag.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "queue_tag is required".into(),
            ));
        }
        Ok(tag)
    }
}

#[derive(Debug, Serialize)]
pub struct QueueDto {
    pub daily_queue_id: Uuid,
    pub day: NaiveDate,
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_number: i32,
}

impl From<DailyQueueRow> for QueueDto {
    fn from(q: DailyQueueRow) -> Self {
        QueueDto {
            daily_queue_id: q.daily_queue_id,
            day: q.day,
            specialist_employee_id: q.specialist_employee_id,
            queue_tag: q.queue_tag,
            active: q.active,
            opened_at: q.opened_at,
            closed_at: q.closed_at,
            last_number: q.last_number,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenQueueResponse {
    pub queue: QueueDto,
    /// Tickets handed out by the day-open sweep for already-confirmed visits.
    pub swept: Vec<SweepTicket>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub queue: QueueDto,
    pub waiting: usize,
    pub serving: usize,
    pub done: usize,
    pub entries: Vec<QueueEntryRow>,
}

/* ============================================================
   Open / close
   ============================================================ */

pub async fn open_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BucketSelector>,
) -> Result<Json<ApiOk<OpenQueueResponse>>, ApiError> {
    ensure_operate(&auth)?;
    let day = req.day();
    let tag = req.tag()?.to_string();

    let (queue, swept) =
        registry::open_queue(&state.db, day, req.specialist_employee_id, &tag)
            .await
            .map_err(ApiError::from)?;

    tracing::info!(
        %day,
        specialist = %req.specialist_employee_id,
        queue_tag = %tag,
        swept = swept.len(),
        "queue opened"
    );

    broadcast_board(&state, day, req.specialist_employee_id, &tag).await;

    Ok(Json(ApiOk {
        data: OpenQueueResponse {
            queue: queue.into(),
            swept,
        },
    }))
}

pub async fn close_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BucketSelector>,
) -> Result<Json<ApiOk<QueueDto>>, ApiError> {
    ensure_operate(&auth)?;
    let day = req.day();
    let tag = req.tag()?.to_string();

    let queue = registry::close_queue(&state.db, day, req.specialist_employee_id, &tag)
        .await
        .map_err(ApiError::from)?;

    broadcast_board(&state, day, req.specialist_employee_id, &tag).await;

    Ok(Json(ApiOk { data: queue.into() }))
}

/* ============================================================
   Walk-ins
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct WalkInRequest {
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    pub day: Option<NaiveDate>,
    pub display_name: String,
    pub phone: Option<String>,
    pub patient_id: Option<Uuid>,
    pub paid_amount_cents: Option<i32>,
}

pub async fn add_walk_in(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<WalkInRequest>,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    ensure_operate(&auth)?;

    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "display_name is required".into(),
        ));
    }
    let tag = req.queue_tag.trim();
    if tag.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "queue_tag is required".into(),
        ));
    }
    let day = req.day.unwrap_or_else(|| Utc::now().date_naive());

    let entry = registry::add_walk_in(
        &state.db,
        day,
        req.specialist_employee_id,
        tag,
        NewEntry {
            patient_id: req.patient_id,
            display_name: display_name.to_string(),
            phone: req.phone.clone(),
            source: if req.patient_id.is_some() {
                EntrySource::Registrar
            } else {
                EntrySource::WalkIn
            },
            visit_id: None,
            paid_amount_cents: req.paid_amount_cents.unwrap_or(0),
        },
    )
    .await
    .map_err(ApiError::from)?;

    broadcast_board(&state, day, req.specialist_employee_id, tag).await;

    Ok(Json(ApiOk { data: entry }))
}

/* ============================================================
   Call / serve transitions
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CallNextRequest {
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    pub day: Option<NaiveDate>,
    pub voice_text: Option<String>,
}

pub async fn call_next(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CallNextRequest>,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    ensure_operate(&auth)?;
    let tag = req.queue_tag.trim();
    if tag.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "queue_tag is required".into(),
        ));
    }
    let day = req.day.unwrap_or_else(|| Utc::now().date_naive());

    let entry = registry::call_next(&state.db, day, req.specialist_employee_id, tag)
        .await
        .map_err(ApiError::from)?;

    let voice_text = req
        .voice_text
        .clone()
        .or_else(|| Some(format!("Ticket number {}", entry.number)));
    state.displays.publish_patient_call(
        tag,
        PatientCall {
            queue_entry_id: entry.queue_entry_id,
            number: entry.number,
            display_name: entry.display_name.clone(),
            queue_tag: tag.to_string(),
            specialist_employee_id: req.specialist_employee_id,
        },
        state.display_call_seconds,
        voice_text,
    );
    broadcast_board(&state, day, req.specialist_employee_id, tag).await;

    Ok(Json(ApiOk { data: entry }))
}

pub async fn start_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue_entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    transition(state, auth, queue_entry_id, EntryStatus::InService).await
}

pub async fn complete_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue_entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    transition(state, auth, queue_entry_id, EntryStatus::Served).await
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue_entry_id): Path<Uuid>,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    transition(state, auth, queue_entry_id, EntryStatus::NoShow).await
}

async fn transition(
    state: AppState,
    auth: AuthContext,
    queue_entry_id: Uuid,
    next: EntryStatus,
) -> Result<Json<ApiOk<QueueEntryRow>>, ApiError> {
    ensure_operate(&auth)?;

    let entry = registry::set_entry_status(&state.db, queue_entry_id, next)
        .await
        .map_err(ApiError::from)?;

    let queue = registry::queue_by_id(&state.db, entry.daily_queue_id)
        .await
        .map_err(ApiError::from)?;
    broadcast_board(&state, queue.day, queue.specialist_employee_id, &queue.queue_tag).await;

    Ok(Json(ApiOk { data: entry }))
}

/* ============================================================
   GET /queues/status
   ============================================================ */

pub async fn queue_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<BucketSelector>,
) -> Result<Json<ApiOk<QueueStatusResponse>>, ApiError> {
    ensure_operate(&auth)?;
    let day = q.day();
    let tag = q.tag()?;

    let queue = registry::find_queue(&state.db, day, q.specialist_employee_id, tag)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| {
            ApiError::NotFound("QUEUE_NOT_FOUND", "No queue for this specialist and day".into())
        })?;

    let entries = registry::entries_for(&state.db, queue.daily_queue_id)
        .await
        .map_err(ApiError::from)?;

    let mut waiting = 0;
    let mut serving = 0;
    let mut done = 0;
    for e in &entries {
        match e.status {
            EntryStatus::Waiting => waiting += 1,
            EntryStatus::Called | EntryStatus::InService => serving += 1,
            EntryStatus::Served => done += 1,
            EntryStatus::NoShow => {}
        }
    }

    Ok(Json(ApiOk {
        data: QueueStatusResponse {
            queue: queue.into(),
            waiting,
            serving,
            done,
            entries,
        },
    }))
}

/* ============================================================
   Helper: push the refreshed bucket to its board
   ============================================================ */

async fn broadcast_board(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) {
    match registry::board_state(&state.db, day, specialist_employee_id, queue_tag).await {
        Ok(Some(board)) => state.displays.publish_queue_update(queue_tag, board),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(queue_tag, error = %e, "failed to load board state for broadcast")
        }
    }
}
