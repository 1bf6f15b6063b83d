use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}

/* -------------------------
   Engine (domain) errors
--------------------------*/

/// Typed outcomes of confirmation / allocation / queue operations.
/// The route layer maps these to protocol responses; chat-bot bindings
/// get the same codes rendered as plain text.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("confirmation token not found")]
    TokenNotFound,
    #[error("confirmation token expired")]
    TokenExpired,
    #[error("confirmation arrived over a different channel than the token was issued for")]
    WrongChannel,
    #[error("patient phone does not match the one on record")]
    PhoneMismatch,
    #[error("visit is already confirmed")]
    AlreadyConfirmed,
    #[error("visit not found")]
    VisitNotFound,
    #[error("queue entry not found")]
    EntryNotFound,
    #[error("no queue exists for this specialist and day")]
    QueueNotFound,
    #[error("queue is closed")]
    QueueClosed,
    #[error("no waiting entries in the queue")]
    QueueEmpty,
    #[error("entry cannot go from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("unknown confirmation channel: {0}")]
    UnknownChannel(String),
    #[error("unknown refund type: {0}")]
    UnknownRefundType(String),
    #[error("unknown staff role: {0}")]
    UnknownRole(i16),
    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
}

impl EngineError {
    /// Wrong channel / phone mismatch are abuse signals; they are logged
    /// but surface to the caller as ordinary validation failures.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, EngineError::WrongChannel | EngineError::PhoneMismatch)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::TokenNotFound => {
                ApiError::NotFound("TOKEN_NOT_FOUND", "No visit matches this confirmation link".into())
            }
            EngineError::TokenExpired => {
                ApiError::BadRequest("TOKEN_EXPIRED", "This confirmation link has expired, please request a new one".into())
            }
            EngineError::WrongChannel => {
                ApiError::BadRequest("WRONG_CHANNEL", "This confirmation link cannot be used here".into())
            }
            EngineError::PhoneMismatch => {
                ApiError::BadRequest("PHONE_MISMATCH", "Phone number does not match our records".into())
            }
            EngineError::AlreadyConfirmed => {
                ApiError::Conflict("ALREADY_CONFIRMED", "This visit is already confirmed".into())
            }
            EngineError::VisitNotFound => {
                ApiError::NotFound("VISIT_NOT_FOUND", "Visit not found".into())
            }
            EngineError::EntryNotFound => {
                ApiError::NotFound("ENTRY_NOT_FOUND", "Queue entry not found".into())
            }
            EngineError::QueueNotFound => {
                ApiError::NotFound("QUEUE_NOT_FOUND", "No queue for this specialist and day".into())
            }
            EngineError::QueueClosed => {
                ApiError::Conflict("QUEUE_CLOSED", "The queue is closed and not accepting entries".into())
            }
            EngineError::QueueEmpty => {
                ApiError::Conflict("QUEUE_EMPTY", "No waiting patients in the queue".into())
            }
            EngineError::InvalidTransition { from, to } => {
                ApiError::Conflict("INVALID_TRANSITION", format!("entry cannot go from {from} to {to}"))
            }
            EngineError::UnknownChannel(s) => {
                ApiError::BadRequest("VALIDATION_ERROR", format!("unknown channel: {s}"))
            }
            EngineError::UnknownRefundType(s) => {
                ApiError::BadRequest("VALIDATION_ERROR", format!("unknown refund_type: {s}"))
            }
            EngineError::UnknownRole(r) => {
                ApiError::Forbidden("FORBIDDEN", format!("unknown staff role: {r}"))
            }
            EngineError::Db(e) => ApiError::Internal(format!("db error: {e}")),
        }
    }
}
