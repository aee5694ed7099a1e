// Error handling module for the discount engine
// Provides the error taxonomy shared by every discount operation and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Main error type for discount operations
///
/// Every public operation returns `DiscountResult<T>`. The first four variants
/// are caller-correctable and carry a human-readable reason; the remaining
/// variants come from the storage layer.
#[derive(Debug, Error)]
pub enum DiscountError {
    /// Malformed input or a violated business invariant
    #[error("{0}")]
    InvalidData(String),

    /// No record for the given id or code
    #[error("{0}")]
    NotFound(String),

    /// Policy forbids the action under the current state
    #[error("{0}")]
    NotAllowed(String),

    /// Unique-constraint conflict, remapped at the operation boundary
    #[error("{0}")]
    Duplicate(String),

    /// Raw unique-constraint signal raised by a repository
    ///
    /// Operations that create or rename records turn this into `Duplicate`.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

/// Result type alias for discount operations
pub type DiscountResult<T> = Result<T, DiscountError>;

/// Coarse classification of a `DiscountError`
///
/// Checkout callers treat `NotAllowed` and `InvalidData` as "cannot apply this
/// code" rather than as a system fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidData,
    NotFound,
    NotAllowed,
    Duplicate,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidData => "INVALID_DATA",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::NotAllowed => "NOT_ALLOWED",
            ErrorKind::Duplicate => "DUPLICATE_ERROR",
            ErrorKind::Unexpected => "UNEXPECTED_STATE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DiscountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscountError::InvalidData(_) => ErrorKind::InvalidData,
            DiscountError::NotFound(_) => ErrorKind::NotFound,
            DiscountError::NotAllowed(_) => ErrorKind::NotAllowed,
            DiscountError::Duplicate(_) | DiscountError::UniqueViolation(_) => ErrorKind::Duplicate,
            DiscountError::Database(_) => ErrorKind::Unexpected,
        }
    }

    /// True when the error means "this code cannot be applied" at checkout
    pub fn is_rejection(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidData | ErrorKind::NotAllowed)
    }

    /// Remap a storage conflict into a `Duplicate` with a caller-facing reason
    ///
    /// Applied once at the boundary of create/update operations. All other
    /// errors pass through unchanged.
    pub fn into_duplicate(self, code: &str) -> Self {
        match self {
            DiscountError::UniqueViolation(constraint) => {
                debug!("Unique violation on {} remapped for code {}", constraint, code);
                DiscountError::Duplicate(format!("Discount with code {} already exists", code))
            }
            other => other,
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DiscountError::InvalidData(_) => StatusCode::BAD_REQUEST,
            DiscountError::NotFound(_) => StatusCode::NOT_FOUND,
            DiscountError::NotAllowed(_) => StatusCode::BAD_REQUEST,
            DiscountError::Duplicate(_) | DiscountError::UniqueViolation(_) => StatusCode::CONFLICT,
            DiscountError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert sqlx errors, separating unique-constraint conflicts from other failures
impl From<sqlx::Error> for DiscountError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return DiscountError::UniqueViolation(constraint);
            }
        }
        DiscountError::Database(err)
    }
}

/// Convert validator errors to InvalidData
impl From<validator::ValidationErrors> for DiscountError {
    fn from(errors: validator::ValidationErrors) -> Self {
        DiscountError::InvalidData(format!("Validation failed: {}", errors))
    }
}

/// Consistent error response structure for the administrative surface
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "NOT_ALLOWED")
    pub error_code: String,

    /// Human-readable reason
    pub message: String,

    /// ISO 8601 timestamp of when the error occurred
    pub timestamp: String,
}

impl DiscountError {
    fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        let status = self.status_code();
        let message = match self {
            DiscountError::Database(db_error) => {
                // Full details stay in the logs
                error!("Database error: {:?}", db_error);
                "A database error occurred".to_string()
            }
            DiscountError::UniqueViolation(_) | DiscountError::Duplicate(_) => {
                warn!("Conflict error: {}", self);
                self.to_string()
            }
            _ => {
                debug!("Discount operation rejected: {}", self);
                self.to_string()
            }
        };

        (
            status,
            ErrorResponse {
                error_code: self.kind().as_str().to_string(),
                message,
                timestamp: Utc::now().to_rfc3339(),
            },
        )
    }
}

impl IntoResponse for DiscountError {
    fn into_response(self) -> Response {
        let (status, error_response) = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}
