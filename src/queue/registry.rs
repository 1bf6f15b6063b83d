use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::display::broadcaster::{BoardEntry, QueueBoardState};
use crate::error::EngineError;
use crate::models::{DailyQueueRow, EntrySource, EntryStatus, QueueEntryRow};
use crate::queue::allocator;

/// Everything needed to insert one ticket besides the allocated number.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub patient_id: Option<Uuid>,
    pub display_name: String,
    pub phone: Option<String>,
    pub source: EntrySource,
    pub visit_id: Option<Uuid>,
    pub paid_amount_cents: i32,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SweepTicket {
    pub visit_id: Uuid,
    pub queue_entry_id: Uuid,
    pub number: i32,
}

pub async fn insert_entry(
    tx: &mut sqlx::PgConnection,
    daily_queue_id: Uuid,
    number: i32,
    entry: &NewEntry,
) -> Result<QueueEntryRow, EngineError> {
    let row = sqlx::query_as::<_, QueueEntryRow>(
        r#"
        INSERT INTO queue_entry
            (daily_queue_id, number, patient_id, display_name, phone,
             source, status, visit_id, paid_amount_cents)
        VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8)
        RETURNING
            queue_entry_id, daily_queue_id, number, patient_id, display_name,
            phone, source, status, visit_id, paid_amount_cents,
            created_at, called_at
        "#,
    )
    .bind(daily_queue_id)
    .bind(number)
    .bind(entry.patient_id)
    .bind(&entry.display_name)
    .bind(entry.phone.as_deref())
    .bind(entry.source)
    .bind(entry.visit_id)
    .bind(entry.paid_amount_cents)
    .fetch_one(&mut *tx)
    .await?;
    Ok(row)
}

/// Open (or reopen) the bucket and run the day-open sweep: every confirmed
/// visit for this bucket that has no ticket yet gets one. Reopening keeps
/// last_number, so numbering resumes where it stopped.
pub async fn open_queue(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<(DailyQueueRow, Vec<SweepTicket>), EngineError> {
    let mut tx = db.begin().await?;

    let queue = sqlx::query_as::<_, DailyQueueRow>(
        r#"
        INSERT INTO daily_queue
            (day, specialist_employee_id, queue_tag, active, opened_at, last_number)
        VALUES ($1, $2, $3, true, now(), 0)
        ON CONFLICT (day, specialist_employee_id, queue_tag)
        DO UPDATE SET active = true, closed_at = NULL
        RETURNING
            daily_queue_id, day, specialist_employee_id, queue_tag,
            active, opened_at, closed_at, last_number
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .fetch_one(&mut *tx)
    .await?;

    // Visits confirmed for this bucket that the allocator has not seen yet.
    // status 1 confirmed, 2 open.
    let pending = sqlx::query_as::<_, crate::models::VisitRow>(
        r#"
        SELECT
            visit_id, patient_id, patient_display_name, patient_phone,
            specialist_employee_id, department, queue_tag,
            scheduled_at, scheduled_day, status, paid_amount_cents,
            confirmation_channel, confirmation_expires_at, confirmed_at, confirmed_by
        FROM visit
        WHERE scheduled_day = $1
          AND specialist_employee_id = $2
          AND queue_tag = $3
          AND status IN (1, 2)
          AND NOT EXISTS (
              SELECT 1 FROM queue_entry e WHERE e.visit_id = visit.visit_id
          )
        ORDER BY scheduled_at ASC
        FOR UPDATE
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .fetch_all(&mut *tx)
    .await?;

    let mut swept = Vec::with_capacity(pending.len());
    for visit in pending {
        let ticket =
            allocator::allocate(&mut tx, day, specialist_employee_id, queue_tag).await?;
        let entry = insert_entry(
            &mut tx,
            ticket.daily_queue_id,
            ticket.number,
            &NewEntry {
                patient_id: Some(visit.patient_id),
                display_name: visit.patient_display_name.clone(),
                phone: visit.patient_phone.clone(),
                source: EntrySource::Confirmation,
                visit_id: Some(visit.visit_id),
                paid_amount_cents: visit.paid_amount_cents,
            },
        )
        .await?;
        swept.push(SweepTicket {
            visit_id: visit.visit_id,
            queue_entry_id: entry.queue_entry_id,
            number: entry.number,
        });
    }

    tx.commit().await?;
    Ok((queue, swept))
}

/// Stop accepting waiting insertions; in-progress entries can still be
/// resolved through the status endpoints.
pub async fn close_queue(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<DailyQueueRow, EngineError> {
    let queue = sqlx::query_as::<_, DailyQueueRow>(
        r#"
        UPDATE daily_queue
        SET active = false, closed_at = now()
        WHERE day = $1
          AND specialist_employee_id = $2
          AND queue_tag = $3
        RETURNING
            daily_queue_id, day, specialist_employee_id, queue_tag,
            active, opened_at, closed_at, last_number
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .fetch_optional(db)
    .await?
    .ok_or(EngineError::QueueNotFound)?;
    Ok(queue)
}

pub async fn queue_by_id(
    db: &PgPool,
    daily_queue_id: Uuid,
) -> Result<DailyQueueRow, EngineError> {
    let queue = sqlx::query_as::<_, DailyQueueRow>(
        r#"
        SELECT
            daily_queue_id, day, specialist_employee_id, queue_tag,
            active, opened_at, closed_at, last_number
        FROM daily_queue
        WHERE daily_queue_id = $1
        "#,
    )
    .bind(daily_queue_id)
    .fetch_optional(db)
    .await?
    .ok_or(EngineError::QueueNotFound)?;
    Ok(queue)
}

pub async fn find_queue(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<Option<DailyQueueRow>, EngineError> {
    let queue = sqlx::query_as::<_, DailyQueueRow>(
        r#"
        SELECT
            daily_queue_id, day, specialist_employee_id, queue_tag,
            active, opened_at, closed_at, last_number
        FROM daily_queue
        WHERE day = $1
          AND specialist_employee_id = $2
          AND queue_tag = $3
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .fetch_optional(db)
    .await?;
    Ok(queue)
}

/// Registrar adds a patient who never pre-booked.
pub async fn add_walk_in(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
    entry: NewEntry,
) -> Result<QueueEntryRow, EngineError> {
    let mut tx = db.begin().await?;
    let ticket = allocator::allocate(&mut tx, day, specialist_employee_id, queue_tag).await?;
    let row = insert_entry(&mut tx, ticket.daily_queue_id, ticket.number, &entry).await?;
    tx.commit().await?;
    Ok(row)
}

/// Flip the lowest-numbered waiting entry to called. Ties are impossible:
/// numbers are unique within the bucket.
pub async fn call_next(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<QueueEntryRow, EngineError> {
    let queue = find_queue(db, day, specialist_employee_id, queue_tag)
        .await?
        .ok_or(EngineError::QueueNotFound)?;

    let mut tx = db.begin().await?;

    let next_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT queue_entry_id
        FROM queue_entry
        WHERE daily_queue_id = $1
          AND status = 0
        ORDER BY number ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(queue.daily_queue_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(queue_entry_id) = next_id else {
        return Err(EngineError::QueueEmpty);
    };

    let row = sqlx::query_as::<_, QueueEntryRow>(
        r#"
        UPDATE queue_entry
        SET status = 1, called_at = now()
        WHERE queue_entry_id = $1
        RETURNING
            queue_entry_id, daily_queue_id, number, patient_id, display_name,
            phone, source, status, visit_id, paid_amount_cents,
            created_at, called_at
        "#,
    )
    .bind(queue_entry_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Operator-driven transition (start service, complete, no-show). Legality
/// is checked against the locked row before anything is written.
pub async fn set_entry_status(
    db: &PgPool,
    queue_entry_id: Uuid,
    next: EntryStatus,
) -> Result<QueueEntryRow, EngineError> {
    let mut tx = db.begin().await?;

    let current = sqlx::query_as::<_, QueueEntryRow>(
        r#"
        SELECT
            queue_entry_id, daily_queue_id, number, patient_id, display_name,
            phone, source, status, visit_id, paid_amount_cents,
            created_at, called_at
        FROM queue_entry
        WHERE queue_entry_id = $1
        FOR UPDATE
        "#,
    )
    .bind(queue_entry_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(EngineError::EntryNotFound)?;

    if !current.status.can_become(next) {
        return Err(EngineError::InvalidTransition {
            from: current.status.as_str(),
            to: next.as_str(),
        });
    }

    let row = sqlx::query_as::<_, QueueEntryRow>(
        r#"
        UPDATE queue_entry
        SET status = $2,
            called_at = CASE WHEN $2 = 1 THEN now() ELSE called_at END
        WHERE queue_entry_id = $1
        RETURNING
            queue_entry_id, daily_queue_id, number, patient_id, display_name,
            phone, source, status, visit_id, paid_amount_cents,
            created_at, called_at
        "#,
    )
    .bind(queue_entry_id)
    .bind(next)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

pub async fn entries_for(
    db: &PgPool,
    daily_queue_id: Uuid,
) -> Result<Vec<QueueEntryRow>, EngineError> {
    let rows = sqlx::query_as::<_, QueueEntryRow>(
        r#"
        SELECT
            queue_entry_id, daily_queue_id, number, patient_id, display_name,
            phone, source, status, visit_id, paid_amount_cents,
            created_at, called_at
        FROM queue_entry
        WHERE daily_queue_id = $1
        ORDER BY number ASC
        "#,
    )
    .bind(daily_queue_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Full board payload for one bucket, or None when no queue exists yet.
pub async fn board_state(
    db: &PgPool,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<Option<QueueBoardState>, EngineError> {
    let Some(queue) = find_queue(db, day, specialist_employee_id, queue_tag).await? else {
        return Ok(None);
    };
    let entries = entries_for(db, queue.daily_queue_id).await?;
    Ok(Some(build_board_state(
        day,
        specialist_employee_id,
        queue_tag,
        &entries,
    )))
}

/// Pure aggregation: ordered entry list plus counts. `called` covers both
/// called and in-service tickets; no-shows stay in the list for continuity
/// but count toward nothing.
pub fn build_board_state(
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
    entries: &[QueueEntryRow],
) -> QueueBoardState {
    let mut waiting = 0;
    let mut called = 0;
    let mut served = 0;
    for e in entries {
        match e.status {
            EntryStatus::Waiting => waiting += 1,
            EntryStatus::Called | EntryStatus::InService => called += 1,
            EntryStatus::Served => served += 1,
            EntryStatus::NoShow => {}
        }
    }
    QueueBoardState {
        day,
        specialist_employee_id,
        queue_tag: queue_tag.to_string(),
        entries: entries
            .iter()
            .map(|e| BoardEntry {
                queue_entry_id: e.queue_entry_id,
                number: e.number,
                display_name: e.display_name.clone(),
                status: e.status.as_str(),
            })
            .collect(),
        waiting,
        called,
        served,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(number: i32, status: EntryStatus) -> QueueEntryRow {
        QueueEntryRow {
            queue_entry_id: Uuid::new_v4(),
            daily_queue_id: Uuid::new_v4(),
            number,
            patient_id: None,
            display_name: format!("Patient {number}"),
            phone: None,
            source: EntrySource::Registrar,
            status,
            visit_id: None,
            paid_amount_cents: 0,
            created_at: Utc::now(),
            called_at: None,
        }
    }

    #[test]
    fn board_state_counts_by_status() {
        use EntryStatus::*;
        let entries = vec![
            entry(1, Served),
            entry(2, InService),
            entry(3, Called),
            entry(4, NoShow),
            entry(5, Waiting),
            entry(6, Waiting),
        ];
        let state = build_board_state(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            Uuid::new_v4(),
            "cardiology_common",
            &entries,
        );
        assert_eq!(state.waiting, 2);
        assert_eq!(state.called, 2);
        assert_eq!(state.served, 1);
        // the no-show stays visible in the list
        assert_eq!(state.entries.len(), 6);
    }

    #[test]
    fn board_state_preserves_entry_order() {
        let entries = vec![
            entry(1, EntryStatus::Served),
            entry(2, EntryStatus::Waiting),
            entry(3, EntryStatus::Waiting),
        ];
        let state = build_board_state(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            Uuid::new_v4(),
            "lab_common",
            &entries,
        );
        let numbers: Vec<i32> = state.entries.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
