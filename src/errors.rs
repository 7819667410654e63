use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::{
    error::{DbErr, SqlErr},
    sqlx, RuntimeErr,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "code": "illegal_transition",
    "message": "Illegal transition: order T1A2B3C4D is completed and can no longer change",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Machine-readable error kind
    #[schema(example = "illegal_transition")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Total mismatch: declared {declared} but items add up to {computed}")]
    TotalMismatch { declared: Decimal, computed: Decimal },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Lost a lock or serialization race; the operation may be replayed.
    #[error("Write contention: {0}")]
    WriteContention(String),

    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::ValidationError(rejection.body_text())
    }
}

/// SQLite busy/locked primary codes and the Postgres/MySQL serialization and deadlock SQLSTATEs.
pub(crate) fn is_lock_contention_code(code: &str) -> bool {
    match code {
        "40001" | "40P01" => true,
        other => other
            .parse::<i32>()
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
    }
}

fn lock_contention(err: &DbErr) -> Option<String> {
    let (DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))
    | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))) = err
    else {
        return None;
    };
    db_err
        .code()
        .filter(|code| is_lock_contention_code(code))
        .map(|_| db_err.message().to_string())
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            debug!(%detail, "Unique constraint violated");
            return ServiceError::Conflict("concurrent write conflict".to_string());
        }
        if let Some(detail) = lock_contention(&err) {
            debug!(%detail, "Lost a lock race");
            return ServiceError::WriteContention(detail);
        }
        match err {
            DbErr::ConnectionAcquire(e) => {
                warn!(error = %e, "Could not acquire a database connection");
                ServiceError::StorageUnavailable(e.to_string())
            }
            DbErr::Conn(e) => {
                warn!(error = %e, "Database connection failed");
                ServiceError::StorageUnavailable(e.to_string())
            }
            other => ServiceError::DatabaseError(other),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::TotalMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IllegalTransition(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StorageUnavailable(_) | Self::WriteContention(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind carried in the `code` field
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::TotalMismatch { .. } => "total_mismatch",
            Self::NotFound(_) => "not_found",
            Self::IllegalTransition(_) => "illegal_transition",
            Self::Conflict(_) => "conflict",
            Self::StorageUnavailable(_) | Self::WriteContention(_) => "storage_unavailable",
            Self::DatabaseError(_) | Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal errors return generic messages.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::StorageUnavailable(_) | Self::WriteContention(_) => {
                "Storage is temporarily unavailable, retry shortly".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::TotalMismatch { declared, computed } => Some(format!(
                "declared={} computed={}",
                declared.normalize(),
                computed.normalize()
            )),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            warn!(error = %self, code = self.code(), "Request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut response = (status, Json(err)).into_response();
        if matches!(self, Self::StorageUnavailable(_) | Self::WriteContention(_)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
