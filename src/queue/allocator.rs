use chrono::NaiveDate;
use sqlx::Row;
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct AllocatedTicket {
    pub daily_queue_id: Uuid,
    pub number: i32,
}

/// Assign the next ticket number for one (day, specialist, queue_tag)
/// bucket. Must run inside the caller's transaction: the bucket row is
/// get-or-created and then locked with FOR UPDATE, so two concurrent
/// confirmations can never read the same last_number. Numbers survive
/// close/reopen of the queue and are never reused.
pub async fn allocate(
    tx: &mut sqlx::PgConnection,
    day: NaiveDate,
    specialist_employee_id: Uuid,
    queue_tag: &str,
) -> Result<AllocatedTicket, EngineError> {
    // Get-or-create in the same unit of work. A concurrent insert loses the
    // race on the unique key and falls through to the locked SELECT below.
    sqlx::query(
        r#"
        INSERT INTO daily_queue
            (day, specialist_employee_id, queue_tag, active, opened_at, last_number)
        VALUES ($1, $2, $3, true, now(), 0)
        ON CONFLICT (day, specialist_employee_id, queue_tag) DO NOTHING
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT daily_queue_id, active
        FROM daily_queue
        WHERE day = $1
          AND specialist_employee_id = $2
          AND queue_tag = $3
        FOR UPDATE
        "#,
    )
    .bind(day)
    .bind(specialist_employee_id)
    .bind(queue_tag)
    .fetch_one(&mut *tx)
    .await?;

    let daily_queue_id: Uuid = row.try_get("daily_queue_id")?;
    let active: bool = row.try_get("active")?;
    if !active {
        return Err(EngineError::QueueClosed);
    }

    let number: i32 = sqlx::query_scalar(
        r#"
        UPDATE daily_queue
        SET last_number = last_number + 1
        WHERE daily_queue_id = $1
        RETURNING last_number
        "#,
    )
    .bind(daily_queue_id)
    .fetch_one(&mut *tx)
    .await?;

    Ok(AllocatedTicket {
        daily_queue_id,
        number,
    })
}
