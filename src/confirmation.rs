use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::hash_token;
use crate::error::EngineError;
use crate::models::{AppState, ConfirmationChannel, VisitRow, VisitStatus};
use crate::queue::{allocator, registry};
use crate::queue::registry::NewEntry;

/// Channel-specific proof carried by a confirmation request. Possession of
/// the token alone is not enough: the bot supplies its user id, the PWA the
/// patient's phone, the registrar their authenticated identity.
#[derive(Debug, Clone)]
pub enum ConfirmIdentity {
    Telegram { channel_user_id: String },
    Pwa { patient_phone: String },
    Registrar { username: String },
}

impl ConfirmIdentity {
    fn channel(&self) -> Option<ConfirmationChannel> {
        match self {
            ConfirmIdentity::Telegram { .. } => Some(ConfirmationChannel::Telegram),
            ConfirmIdentity::Pwa { .. } => Some(ConfirmationChannel::Pwa),
            // Staff can confirm regardless of the channel the token was issued for.
            ConfirmIdentity::Registrar { .. } => None,
        }
    }

    fn qualified(&self) -> String {
        match self {
            ConfirmIdentity::Telegram { channel_user_id } => format!("telegram:{channel_user_id}"),
            ConfirmIdentity::Pwa { patient_phone } => format!("pwa:{patient_phone}"),
            ConfirmIdentity::Registrar { username } => format!("registrar:{username}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub visit_id: Uuid,
    pub status: VisitStatus,
    pub queue_numbers: Option<Vec<i32>>,
}

/// Token-carrying confirmation (telegram and pwa bindings).
pub async fn confirm_by_token(
    state: &AppState,
    token: &str,
    identity: ConfirmIdentity,
) -> Result<ConfirmOutcome, EngineError> {
    let token_hash = hash_token(token);

    let mut tx = state.db.begin().await?;

    let visit = sqlx::query_as::<_, VisitRow>(
        r#"
        SELECT
            visit_id, patient_id, patient_display_name, patient_phone,
            specialist_employee_id, department, queue_tag,
            scheduled_at, scheduled_day, status, paid_amount_cents,
            confirmation_channel, confirmation_expires_at, confirmed_at, confirmed_by
        FROM visit
        WHERE confirmation_token_hash = $1
        FOR UPDATE
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(EngineError::TokenNotFound)?;

    if let Err(e) = validate_confirmation(&visit, &identity, Utc::now()) {
        if e.is_security_violation() {
            tracing::warn!(
                visit_id = %visit.visit_id,
                attempted_by = %identity.qualified(),
                error = %e,
                "rejected confirmation attempt"
            );
        }
        return Err(e);
    }

    let outcome = apply_confirmation(state, &mut tx, &visit, &identity).await?;
    tx.commit().await?;

    if outcome.queue_numbers.is_some() {
        broadcast_bucket(state, &visit).await;
    }
    Ok(outcome)
}

/// In-person confirmation at the desk. No token and no expiry check (staff
/// override); the single-use guard still applies.
pub async fn confirm_by_visit_id(
    state: &AppState,
    visit_id: Uuid,
    registrar_username: &str,
) -> Result<ConfirmOutcome, EngineError> {
    let identity = ConfirmIdentity::Registrar {
        username: registrar_username.to_string(),
    };

    let mut tx = state.db.begin().await?;

    let visit = sqlx::query_as::<_, VisitRow>(
        r#"
        SELECT
            visit_id, patient_id, patient_display_name, patient_phone,
            specialist_employee_id, department, queue_tag,
            scheduled_at, scheduled_day, status, paid_amount_cents,
            confirmation_channel, confirmation_expires_at, confirmed_at, confirmed_by
        FROM visit
        WHERE visit_id = $1
        FOR UPDATE
        "#,
    )
    .bind(visit_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(EngineError::VisitNotFound)?;

    if visit.status != VisitStatus::PendingConfirmation {
        return Err(EngineError::AlreadyConfirmed);
    }

    let outcome = apply_confirmation(state, &mut tx, &visit, &identity).await?;
    tx.commit().await?;

    if outcome.queue_numbers.is_some() {
        broadcast_bucket(state, &visit).await;
    }
    Ok(outcome)
}

/// Flip the visit, and for a same-day visit allocate the ticket
/// in the same transaction so a crash can never leave a confirmed visit
/// without its number.
async fn apply_confirmation(
    state: &AppState,
    tx: &mut sqlx::PgConnection,
    visit: &VisitRow,
    identity: &ConfirmIdentity,
) -> Result<ConfirmOutcome, EngineError> {
    let today = Utc::now().date_naive();
    let same_day = visit.scheduled_day == today;

    let new_status = if same_day && state.auto_open_same_day {
        VisitStatus::Open
    } else {
        VisitStatus::Confirmed
    };

    sqlx::query(
        r#"
        UPDATE visit
        SET status = $2,
            confirmed_at = now(),
            confirmed_by = $3
        WHERE visit_id = $1
        "#,
    )
    .bind(visit.visit_id)
    .bind(new_status)
    .bind(identity.qualified())
    .execute(&mut *tx)
    .await?;

    let queue_numbers = if same_day {
        let ticket = allocator::allocate(
            tx,
            visit.scheduled_day,
            visit.specialist_employee_id,
            &visit.queue_tag,
        )
        .await?;
        registry::insert_entry(
            tx,
            ticket.daily_queue_id,
            ticket.number,
            &NewEntry {
                patient_id: Some(visit.patient_id),
                display_name: visit.patient_display_name.clone(),
                phone: visit.patient_phone.clone(),
                source: crate::models::EntrySource::Confirmation,
                visit_id: Some(visit.visit_id),
                paid_amount_cents: visit.paid_amount_cents,
            },
        )
        .await?;
        Some(vec![ticket.number])
    } else {
        // Future-day visits get their number from the day-open sweep.
        None
    };

    Ok(ConfirmOutcome {
        visit_id: visit.visit_id,
        status: new_status,
        queue_numbers,
    })
}

/// Push the refreshed bucket to its board. Delivery problems are the
/// broadcaster's to log; the confirmation already committed.
async fn broadcast_bucket(state: &AppState, visit: &VisitRow) {
    match registry::board_state(
        &state.db,
        visit.scheduled_day,
        visit.specialist_employee_id,
        &visit.queue_tag,
    )
    .await
    {
        Ok(Some(board)) => state.displays.publish_queue_update(&visit.queue_tag, board),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "failed to load board state after confirmation"),
    }
}

/// Expiry, channel, phone and idempotency checks over the locked visit row,
/// in that order. Pure so the whole matrix is testable without a database.
fn validate_confirmation(
    visit: &VisitRow,
    identity: &ConfirmIdentity,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    match visit.confirmation_expires_at {
        Some(expires_at) if now <= expires_at => {}
        _ => return Err(EngineError::TokenExpired),
    }

    if let Some(requested) = identity.channel() {
        match visit.confirmation_channel {
            Some(issued) if issued == requested => {}
            // Phone-booked visits have no bot/app identity to match; they
            // are confirmed at the desk only.
            _ => return Err(EngineError::WrongChannel),
        }
    }

    if let ConfirmIdentity::Pwa { patient_phone } = identity {
        let on_record = visit.patient_phone.as_deref().unwrap_or("");
        if normalize_phone(on_record) != normalize_phone(patient_phone) {
            return Err(EngineError::PhoneMismatch);
        }
    }

    if visit.status != VisitStatus::PendingConfirmation {
        return Err(EngineError::AlreadyConfirmed);
    }

    Ok(())
}

/// "+998 90 123-45-67" and "+998901234567" are the same number.
fn normalize_phone(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn visit(channel: ConfirmationChannel, status: VisitStatus) -> VisitRow {
        let now = Utc::now();
        VisitRow {
            visit_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            patient_display_name: "Aziza Karimova".into(),
            patient_phone: Some("+998901234567".into()),
            specialist_employee_id: Uuid::new_v4(),
            department: "cardiology".into(),
            queue_tag: "cardiology_common".into(),
            scheduled_at: now,
            scheduled_day: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            status,
            paid_amount_cents: 150_000,
            confirmation_channel: Some(channel),
            confirmation_expires_at: Some(now + Duration::hours(2)),
            confirmed_at: None,
            confirmed_by: None,
        }
    }

    fn telegram() -> ConfirmIdentity {
        ConfirmIdentity::Telegram { channel_user_id: "556677".into() }
    }

    fn pwa(phone: &str) -> ConfirmIdentity {
        ConfirmIdentity::Pwa { patient_phone: phone.into() }
    }

    #[test]
    fn matching_channel_passes() {
        let v = visit(ConfirmationChannel::Telegram, VisitStatus::PendingConfirmation);
        assert!(validate_confirmation(&v, &telegram(), Utc::now()).is_ok());
    }

    #[test]
    fn expired_token_is_rejected_first() {
        let mut v = visit(ConfirmationChannel::Telegram, VisitStatus::PendingConfirmation);
        v.confirmation_expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(matches!(
            validate_confirmation(&v, &telegram(), Utc::now()),
            Err(EngineError::TokenExpired)
        ));
    }

    #[test]
    fn cross_channel_replay_is_rejected() {
        let v = visit(ConfirmationChannel::Telegram, VisitStatus::PendingConfirmation);
        assert!(matches!(
            validate_confirmation(&v, &pwa("+998901234567"), Utc::now()),
            Err(EngineError::WrongChannel)
        ));
    }

    #[test]
    fn phone_booked_visit_rejects_bot_and_pwa() {
        let v = visit(ConfirmationChannel::Phone, VisitStatus::PendingConfirmation);
        assert!(matches!(
            validate_confirmation(&v, &telegram(), Utc::now()),
            Err(EngineError::WrongChannel)
        ));
    }

    #[test]
    fn registrar_is_exempt_from_channel_check() {
        let v = visit(ConfirmationChannel::Telegram, VisitStatus::PendingConfirmation);
        let registrar = ConfirmIdentity::Registrar { username: "gulnora".into() };
        assert!(validate_confirmation(&v, &registrar, Utc::now()).is_ok());
    }

    #[test]
    fn pwa_phone_mismatch_is_rejected() {
        let v = visit(ConfirmationChannel::Pwa, VisitStatus::PendingConfirmation);
        assert!(matches!(
            validate_confirmation(&v, &pwa("+998900000000"), Utc::now()),
            Err(EngineError::PhoneMismatch)
        ));
    }

    #[test]
    fn pwa_phone_match_ignores_formatting() {
        let v = visit(ConfirmationChannel::Pwa, VisitStatus::PendingConfirmation);
        assert!(validate_confirmation(&v, &pwa("+998 90 123-45-67"), Utc::now()).is_ok());
    }

    #[test]
    fn double_submit_hits_the_idempotency_guard() {
        let v = visit(ConfirmationChannel::Telegram, VisitStatus::Confirmed);
        assert!(matches!(
            validate_confirmation(&v, &telegram(), Utc::now()),
            Err(EngineError::AlreadyConfirmed)
        ));
    }

    #[test]
    fn confirmed_by_is_channel_qualified() {
        assert_eq!(telegram().qualified(), "telegram:556677");
        assert_eq!(pwa("+998901234567").qualified(), "pwa:+998901234567");
        let r = ConfirmIdentity::Registrar { username: "gulnora".into() };
        assert_eq!(r.qualified(), "registrar:gulnora");
    }
}
