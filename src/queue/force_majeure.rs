use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::auth::{generate_opaque_token, hash_token};
use crate::error::EngineError;
use crate::models::{AppState, EntryStatus, RefundType};
use crate::queue::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Success,
    Skip,
    Error,
}

/// One line of the per-entry result array. A bad entry never aborts the
/// batch; partial success is the expected shape of a force-majeure event.
#[derive(Debug, Serialize)]
pub struct EntryOutcome {
    pub queue_entry_id: Uuid,
    pub outcome: BatchOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_visit_day: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_request_id: Option<Uuid>,
}

impl EntryOutcome {
    fn success(id: Uuid) -> Self {
        EntryOutcome {
            queue_entry_id: id,
            outcome: BatchOutcome::Success,
            detail: None,
            new_visit_day: None,
            refund_request_id: None,
        }
    }

    fn skip(id: Uuid, detail: impl Into<String>) -> Self {
        EntryOutcome {
            queue_entry_id: id,
            outcome: BatchOutcome::Skip,
            detail: Some(detail.into()),
            new_visit_day: None,
            refund_request_id: None,
        }
    }

    fn error(id: Uuid, detail: impl Into<String>) -> Self {
        EntryOutcome {
            queue_entry_id: id,
            outcome: BatchOutcome::Error,
            detail: Some(detail.into()),
            new_visit_day: None,
            refund_request_id: None,
        }
    }
}

/// Entry joined with its bucket, so the batch can verify the entry really
/// belongs to the specialist/day being remediated.
#[derive(Debug, sqlx::FromRow)]
struct BatchEntryRow {
    queue_entry_id: Uuid,
    patient_id: Option<Uuid>,
    display_name: String,
    phone: Option<String>,
    status: EntryStatus,
    visit_id: Option<Uuid>,
    paid_amount_cents: i32,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: String,
}

async fn lock_batch_entry(
    tx: &mut sqlx::PgConnection,
    queue_entry_id: Uuid,
) -> Result<Option<BatchEntryRow>, EngineError> {
    let row = sqlx::query_as::<_, BatchEntryRow>(
        r#"
        SELECT
            e.queue_entry_id, e.patient_id, e.display_name, e.phone,
            e.status, e.visit_id, e.paid_amount_cents,
            q.day, q.specialist_employee_id, q.queue_tag
        FROM queue_entry e
        JOIN daily_queue q ON q.daily_queue_id = e.daily_queue_id
        WHERE e.queue_entry_id = $1
        FOR UPDATE OF e
        "#,
    )
    .bind(queue_entry_id)
    .fetch_optional(&mut *tx)
    .await?;
    Ok(row)
}

/// Explicit id list, or every waiting entry of the specialist's day across
/// all of their queue tags.
async fn resolve_entry_ids(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    entry_ids: Option<Vec<Uuid>>,
) -> Result<Vec<Uuid>, EngineError> {
    if let Some(ids) = entry_ids {
        return Ok(ids);
    }
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT e.queue_entry_id
        FROM queue_entry e
        JOIN daily_queue q ON q.daily_queue_id = e.daily_queue_id
        WHERE q.day = $1
          AND q.specialist_employee_id = $2
          AND e.status = 0
        ORDER BY e.number ASC
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .fetch_all(db)
    .await?;
    Ok(ids)
}

/// An entry still in play can be remediated; anything already resolved is
/// an idempotent skip on the second run.
fn still_pending(status: EntryStatus) -> bool {
    matches!(status, EntryStatus::Waiting | EntryStatus::Called)
}

/// Move every selected visit one day forward and re-arm its confirmation:
/// fresh single-use token, expiry at the new scheduled time, status back to
/// pending. Pure walk-ins have nothing to transfer and are skipped.
pub async fn transfer_to_tomorrow(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    entry_ids: Option<Vec<Uuid>>,
    notify_patients: bool,
) -> Result<Vec<EntryOutcome>, EngineError> {
    let ids = resolve_entry_ids(&state.db, day, specialist_employee_id, entry_ids).await?;

    let mut results = Vec::with_capacity(ids.len());
    let mut touched_tags: BTreeSet<String> = BTreeSet::new();

    for id in ids {
        match transfer_one(state, day, specialist_employee_id, id, notify_patients).await {
            Ok((outcome, tag)) => {
                if outcome.outcome == BatchOutcome::Success {
                    if let Some(tag) = tag {
                        touched_tags.insert(tag);
                    }
                }
                results.push(outcome);
            }
            Err(e) => {
                tracing::error!(queue_entry_id = %id, error = %e, "transfer failed");
                results.push(EntryOutcome::error(id, e.to_string()));
            }
        }
    }

    refresh_boards(state, day, specialist_employee_id, &touched_tags).await;
    Ok(results)
}

async fn transfer_one(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_entry_id: Uuid,
    notify_patients: bool,
) -> Result<(EntryOutcome, Option<String>), EngineError> {
    let mut tx = state.db.begin().await?;

    let Some(entry) = lock_batch_entry(&mut tx, queue_entry_id).await? else {
        return Ok((EntryOutcome::error(queue_entry_id, "entry not found"), None));
    };
    if entry.day != day || entry.specialist_employee_id != specialist_employee_id {
        return Ok((
            EntryOutcome::error(queue_entry_id, "entry belongs to a different specialist/day"),
            None,
        ));
    }
    if !still_pending(entry.status) {
        return Ok((EntryOutcome::skip(queue_entry_id, "already resolved"), None));
    }
    let Some(visit_id) = entry.visit_id else {
        return Ok((EntryOutcome::skip(queue_entry_id, "no associated visit"), None));
    };

    let token = generate_opaque_token();
    let new_day: Option<NaiveDate> = sqlx::query_scalar(
        r#"
        UPDATE visit
        SET scheduled_at = scheduled_at + interval '1 day',
            scheduled_day = scheduled_day + 1,
            status = 0,
            confirmation_token_hash = $2,
            confirmation_expires_at = scheduled_at + interval '1 day',
            confirmed_at = NULL,
            confirmed_by = NULL
        WHERE visit_id = $1
        RETURNING scheduled_day
        "#,
    )
    .bind(visit_id)
    .bind(hash_token(&token))
    .fetch_optional(&mut *tx)
    .await?;

    let Some(new_day) = new_day else {
        return Ok((EntryOutcome::error(queue_entry_id, "visit row missing"), None));
    };

    // The old ticket is spent; its number is never reissued.
    sqlx::query(r#"UPDATE queue_entry SET status = 4 WHERE queue_entry_id = $1"#)
        .bind(queue_entry_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if notify_patients {
        state
            .notifier
            .visit_transferred(entry.phone.as_deref(), &entry.display_name, new_day, &token)
            .await;
    }

    let mut outcome = EntryOutcome::success(queue_entry_id);
    outcome.new_visit_day = Some(new_day);
    Ok((outcome, Some(entry.queue_tag)))
}

/// Cancel every selected entry and put the paid amount on the refund
/// ledger. Deposit refunds credit the patient's running balance in the same
/// transaction as the refund record, so the two never disagree.
pub async fn cancel_with_refund(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    entry_ids: Option<Vec<Uuid>>,
    refund_type: RefundType,
) -> Result<Vec<EntryOutcome>, EngineError> {
    let ids = resolve_entry_ids(&state.db, day, specialist_employee_id, entry_ids).await?;

    let mut results = Vec::with_capacity(ids.len());
    let mut touched_tags: BTreeSet<String> = BTreeSet::new();

    for id in ids {
        match cancel_one(state, day, specialist_employee_id, id, refund_type).await {
            Ok((outcome, tag)) => {
                if outcome.outcome == BatchOutcome::Success {
                    if let Some(tag) = tag {
                        touched_tags.insert(tag);
                    }
                }
                results.push(outcome);
            }
            Err(e) => {
                tracing::error!(queue_entry_id = %id, error = %e, "cancel-with-refund failed");
                results.push(EntryOutcome::error(id, e.to_string()));
            }
        }
    }

    refresh_boards(state, day, specialist_employee_id, &touched_tags).await;
    Ok(results)
}

async fn cancel_one(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_entry_id: Uuid,
    refund_type: RefundType,
) -> Result<(EntryOutcome, Option<String>), EngineError> {
    let mut tx = state.db.begin().await?;

    let Some(entry) = lock_batch_entry(&mut tx, queue_entry_id).await? else {
        return Ok((EntryOutcome::error(queue_entry_id, "entry not found"), None));
    };
    if entry.day != day || entry.specialist_employee_id != specialist_employee_id {
        return Ok((
            EntryOutcome::error(queue_entry_id, "entry belongs to a different specialist/day"),
            None,
        ));
    }
    if !still_pending(entry.status) {
        return Ok((EntryOutcome::skip(queue_entry_id, "already resolved"), None));
    }
    if refund_type == RefundType::Deposit && entry.paid_amount_cents > 0 && entry.patient_id.is_none()
    {
        return Ok((
            EntryOutcome::error(queue_entry_id, "walk-in has no patient account for a deposit credit"),
            None,
        ));
    }

    sqlx::query(r#"UPDATE queue_entry SET status = 4 WHERE queue_entry_id = $1"#)
        .bind(queue_entry_id)
        .execute(&mut *tx)
        .await?;

    if let Some(visit_id) = entry.visit_id {
        sqlx::query(r#"UPDATE visit SET status = 4 WHERE visit_id = $1"#)
            .bind(visit_id)
            .execute(&mut *tx)
            .await?;
    }

    let mut refund_request_id = None;
    if entry.paid_amount_cents > 0 {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO refund_request
                (queue_entry_id, patient_id, amount_cents, refund_type, status, note)
            VALUES ($1, $2, $3, $4, 0, 'force majeure cancellation')
            RETURNING refund_request_id
            "#,
        )
        .bind(queue_entry_id)
        .bind(entry.patient_id)
        .bind(entry.paid_amount_cents)
        .bind(refund_type)
        .fetch_one(&mut *tx)
        .await?;
        refund_request_id = Some(id);

        if refund_type == RefundType::Deposit {
            sqlx::query(
                r#"
                INSERT INTO patient_deposit (patient_id, balance_cents)
                VALUES ($1, $2)
                ON CONFLICT (patient_id)
                DO UPDATE SET balance_cents = patient_deposit.balance_cents + $2,
                              updated_at = now()
                "#,
            )
            .bind(entry.patient_id)
            .bind(entry.paid_amount_cents)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let mut outcome = EntryOutcome::success(queue_entry_id);
    outcome.refund_request_id = refund_request_id;
    Ok((outcome, Some(entry.queue_tag)))
}

/// Boards covering the remediated buckets resync after the batch.
async fn refresh_boards(
    state: &AppState,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    tags: &BTreeSet<String>,
) {
    for tag in tags {
        match registry::board_state(&state.db, day, specialist_employee_id, tag).await {
            Ok(Some(board)) => state.displays.publish_queue_update(tag, board),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(queue_tag = %tag, error = %e, "failed to refresh board after batch")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_predicate_matches_remediable_states() {
        assert!(still_pending(EntryStatus::Waiting));
        assert!(still_pending(EntryStatus::Called));
        assert!(!still_pending(EntryStatus::InService));
        assert!(!still_pending(EntryStatus::Served));
        assert!(!still_pending(EntryStatus::NoShow));
    }

    #[test]
    fn outcome_serialization_shape() {
        let skip = EntryOutcome::skip(Uuid::new_v4(), "no associated visit");
        let v = serde_json::to_value(&skip).unwrap();
        assert_eq!(v["outcome"], "skip");
        assert_eq!(v["detail"], "no associated visit");
        assert!(v.get("refund_request_id").is_none());

        let ok = EntryOutcome::success(Uuid::new_v4());
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["outcome"], "success");
    }
}
