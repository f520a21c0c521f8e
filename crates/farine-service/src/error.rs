//! # Service Errors
//!
//! Everything an operation can fail with, and the structured response
//! handed to clients.
//!
//! ```text
//! CoreError ──┐
//! DbError ────┼──► ServiceError ──► ApiError { code, message }
//! sessions ───┘        │
//!                      └── is_retryable() ──► DeliveryService retries once
//! ```
//!
//! Bus failures never reach this type: the emitter logs and drops them.

use serde::Serialize;
use thiserror::Error;

use farine_core::{CoreError, ValidationError};
use farine_db::DbError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Storage error: {0}")]
    Storage(DbError),

    /// The client wrote against a session that is no longer the courier's
    /// current one.
    #[error("Session {requested} is not the current session {current}")]
    SessionMismatch { requested: String, current: String },

    #[error("Courier {courier} has no open session")]
    NoOpenSession { courier: String },

    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: String },

    #[error("{actor} may not {action} session {session_id}")]
    Forbidden {
        actor: String,
        action: String,
        session_id: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    pub fn forbidden(actor: &str, action: &str, session_id: &str) -> Self {
        ServiceError::Forbidden {
            actor: actor.to_string(),
            action: action.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Core(err) => match err {
                CoreError::OverTarget { .. } => ErrorCode::OverTarget,
                CoreError::InsufficientAmount { .. } => ErrorCode::InsufficientAmount,
                CoreError::NothingToDeliver { .. } => ErrorCode::NothingToDeliver,
                CoreError::DeletionForbidden { .. } => ErrorCode::DeletionForbidden,
                CoreError::OrderFinalized { .. } => ErrorCode::OrderFinalized,
                CoreError::InvalidQuantity(_) => ErrorCode::InvalidQuantity,
                CoreError::InvalidAmount(_) => ErrorCode::InvalidAmount,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            ServiceError::Storage(err) => match err {
                DbError::UniqueViolation { .. }
                | DbError::ForeignKeyViolation { .. }
                | DbError::CheckViolation(_) => ErrorCode::ValidationError,
                _ => ErrorCode::StorageError,
            },
            ServiceError::SessionMismatch { .. } => ErrorCode::SessionMismatch,
            ServiceError::NoOpenSession { .. } => ErrorCode::NoOpenSession,
            ServiceError::SessionClosed { .. } => ErrorCode::SessionClosed,
            ServiceError::Forbidden { .. } => ErrorCode::Forbidden,
            ServiceError::NotFound { .. } => ErrorCode::NotFound,
            ServiceError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Busy database, exhausted pool or a failed commit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Storage(err) if err.is_retryable())
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ServiceError::NotFound { entity, id },
            other => ServiceError::Storage(other),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Core(CoreError::Validation(err))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// =============================================================================
// API Error
// =============================================================================

/// Structured failure returned to clients.
///
/// ```json
/// {
///   "code": "OVER_TARGET",
///   "message": "Order o-1: delivering 600.02 on top of 400.00 exceeds target 1000.00"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidQuantity,
    InvalidAmount,
    OverTarget,
    InsufficientAmount,
    NothingToDeliver,
    DeletionForbidden,
    OrderFinalized,
    SessionMismatch,
    NoOpenSession,
    SessionClosed,
    NotFound,
    Forbidden,
    /// Store failure; worth one retry.
    StorageError,
    ConfigError,
    Internal,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::Storage(db) if code == ErrorCode::StorageError => {
                // Log the actual error but return a generic message
                tracing::error!(error = %db, "Storage operation failed");
                ApiError::new(code, "Database operation failed")
            }
            ServiceError::Storage(DbError::UniqueViolation { field, value }) => {
                ApiError::new(code, format!("{} '{}' already exists", field, value))
            }
            ServiceError::Storage(DbError::ForeignKeyViolation { message }) => {
                tracing::error!(%message, "Foreign key violation");
                ApiError::new(code, "Invalid reference")
            }
            ServiceError::Config(message) => {
                tracing::error!(%message, "Configuration error");
                ApiError::new(code, message)
            }
            other => ApiError::new(code, other.to_string()),
        }
    }
}
