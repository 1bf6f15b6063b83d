use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::display::broadcaster::DisplayHub;
use crate::error::EngineError;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub auto_open_same_day: bool,
    pub display_call_seconds: i64,
    pub displays: DisplayHub,
    pub notifier: std::sync::Arc<dyn crate::notify::PatientNotifier>,
}

/* -------------------------
   Closed enums
--------------------------*/

/// Staff roles stored as smallint in staff_user.roles:
/// 0 Patient, 1 Admin, 2 Manager, 3 Doctor, 4 Registrar.
/// Unknown values are a typed error, never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffRole {
    Patient,
    Admin,
    Manager,
    Doctor,
    Registrar,
}

impl StaffRole {
    pub fn from_i16(v: i16) -> Result<Self, EngineError> {
        match v {
            0 => Ok(StaffRole::Patient),
            1 => Ok(StaffRole::Admin),
            2 => Ok(StaffRole::Manager),
            3 => Ok(StaffRole::Doctor),
            4 => Ok(StaffRole::Registrar),
            other => Err(EngineError::UnknownRole(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Patient => "patient",
            StaffRole::Admin => "admin",
            StaffRole::Manager => "manager",
            StaffRole::Doctor => "doctor",
            StaffRole::Registrar => "registrar",
        }
    }

    /// Open/close queues, add walk-ins, call/serve tickets, confirm at the desk.
    pub fn can_operate_queue(&self) -> bool {
        matches!(self, StaffRole::Admin | StaffRole::Manager | StaffRole::Registrar)
    }

    /// Bulk transfer / cancel-with-refund of a specialist's day.
    pub fn can_force_majeure(&self) -> bool {
        matches!(self, StaffRole::Admin | StaffRole::Manager)
    }
}

/// Channel a confirmation token was issued for. `Phone` means the visit was
/// booked over the phone; those can only be confirmed at the registrar desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationChannel {
    Telegram = 0,
    Pwa = 1,
    Phone = 2,
}

impl ConfirmationChannel {
    /// Normalization table for every accepted spelling coming off the wire.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" | "tg" | "bot" => Ok(ConfirmationChannel::Telegram),
            "pwa" | "web" | "app" => Ok(ConfirmationChannel::Pwa),
            "phone" | "call" => Ok(ConfirmationChannel::Phone),
            other => Err(EngineError::UnknownChannel(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationChannel::Telegram => "telegram",
            ConfirmationChannel::Pwa => "pwa",
            ConfirmationChannel::Phone => "phone",
        }
    }
}

/// Visit lifecycle as far as this engine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    PendingConfirmation = 0,
    Confirmed = 1,
    Open = 2,
    Served = 3,
    Cancelled = 4,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::PendingConfirmation => "pending_confirmation",
            VisitStatus::Confirmed => "confirmed",
            VisitStatus::Open => "open",
            VisitStatus::Served => "served",
            VisitStatus::Cancelled => "cancelled",
        }
    }
}

/// Where a queue entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Confirmation = 0,
    Registrar = 1,
    Telegram = 2,
    WalkIn = 3,
}

/// Service status of one ticket. Entries are never deleted, only flipped,
/// so numbering stays continuous for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Waiting = 0,
    Called = 1,
    InService = 2,
    Served = 3,
    NoShow = 4,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Called => "called",
            EntryStatus::InService => "in_service",
            EntryStatus::Served => "served",
            EntryStatus::NoShow => "no_show",
        }
    }

    /// waiting -> called -> in_service -> served; waiting/called -> no_show.
    pub fn can_become(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Waiting, Called)
                | (Called, InService)
                | (InService, Served)
                | (Waiting, NoShow)
                | (Called, NoShow)
        )
    }
}

/// How force-majeure money goes back to the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Bank = 0,
    Deposit = 1,
    Cash = 2,
}

impl RefundType {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bank" | "transfer" | "bank_transfer" => Ok(RefundType::Bank),
            "deposit" | "balance" | "clinic_deposit" => Ok(RefundType::Deposit),
            "cash" => Ok(RefundType::Cash),
            other => Err(EngineError::UnknownRefundType(other.to_string())),
        }
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub staff_user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub staff_user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VisitRow {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub patient_display_name: String,
    pub patient_phone: Option<String>,
    pub specialist_employee_id: Uuid,
    pub department: String,
    pub queue_tag: String,
    pub scheduled_at: DateTime<Utc>,
    pub scheduled_day: NaiveDate,
    pub status: VisitStatus,
    pub paid_amount_cents: i32,
    pub confirmation_channel: Option<ConfirmationChannel>,
    pub confirmation_expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailyQueueRow {
    pub daily_queue_id: Uuid,
    pub day: NaiveDate,
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_number: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QueueEntryRow {
    pub queue_entry_id: Uuid,
    pub daily_queue_id: Uuid,
    pub number: i32,
    pub patient_id: Option<Uuid>,
    pub display_name: String,
    pub phone: Option<String>,
    pub source: EntrySource,
    pub status: EntryStatus,
    pub visit_id: Option<Uuid>,
    pub paid_amount_cents: i32,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_normalization_accepts_known_spellings() {
        assert_eq!(ConfirmationChannel::parse("telegram").unwrap(), ConfirmationChannel::Telegram);
        assert_eq!(ConfirmationChannel::parse("TG").unwrap(), ConfirmationChannel::Telegram);
        assert_eq!(ConfirmationChannel::parse("bot").unwrap(), ConfirmationChannel::Telegram);
        assert_eq!(ConfirmationChannel::parse(" pwa ").unwrap(), ConfirmationChannel::Pwa);
        assert_eq!(ConfirmationChannel::parse("Web").unwrap(), ConfirmationChannel::Pwa);
        assert_eq!(ConfirmationChannel::parse("phone").unwrap(), ConfirmationChannel::Phone);
    }

    #[test]
    fn channel_normalization_rejects_unknown() {
        let err = ConfirmationChannel::parse("fax").unwrap_err();
        assert!(matches!(err, EngineError::UnknownChannel(s) if s == "fax"));
    }

    #[test]
    fn refund_type_normalization() {
        assert_eq!(RefundType::parse("bank_transfer").unwrap(), RefundType::Bank);
        assert_eq!(RefundType::parse("Balance").unwrap(), RefundType::Deposit);
        assert_eq!(RefundType::parse("cash").unwrap(), RefundType::Cash);
        assert!(matches!(
            RefundType::parse("gold"),
            Err(EngineError::UnknownRefundType(_))
        ));
    }

    #[test]
    fn staff_role_unknown_is_typed_error() {
        assert_eq!(StaffRole::from_i16(4).unwrap(), StaffRole::Registrar);
        assert!(matches!(StaffRole::from_i16(9), Err(EngineError::UnknownRole(9))));
    }

    #[test]
    fn entry_transition_table() {
        use EntryStatus::*;
        assert!(Waiting.can_become(Called));
        assert!(Called.can_become(InService));
        assert!(InService.can_become(Served));
        assert!(Waiting.can_become(NoShow));
        assert!(Called.can_become(NoShow));

        assert!(!Waiting.can_become(InService));
        assert!(!Waiting.can_become(Served));
        assert!(!InService.can_become(NoShow));
        assert!(!Served.can_become(Waiting));
        assert!(!NoShow.can_become(Called));
    }
}
