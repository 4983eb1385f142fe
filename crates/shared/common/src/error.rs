//! Unified error handling for the data-access stack.
//!
//! Repositories and adapter factories propagate these errors unchanged;
//! only the service layer translates store failures into domain-facing ones.

use domain::DomainError;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    // Resource errors
    #[error("Resource not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{0} already exists")]
    Conflict(String),

    // Wiring errors
    #[error("Unknown entity '{name}', known entities: {}", .known.join(", "))]
    UnknownEntity { name: String, known: Vec<String> },

    #[error("Unsupported backend '{requested}', supported backends: {}", .supported.join(", "))]
    UnsupportedBackend {
        requested: String,
        supported: Vec<String>,
    },

    // Caller errors
    #[error("{0}")]
    Validation(String),

    // Store errors
    #[error("Transaction conflicted with a concurrent write")]
    TransactionConflict,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(sea_orm::DbErr),

    // Internal
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get stable error code for callers
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "NOT_FOUND",
            AppError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            AppError::Conflict(_) => "CONFLICT",
            AppError::UnknownEntity { .. } => "UNKNOWN_ENTITY",
            AppError::UnsupportedBackend { .. } => "UNSUPPORTED_BACKEND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::TransactionConflict => "TRANSACTION_CONFLICT",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this is a uniqueness/referential constraint failure
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, AppError::ConstraintViolation(_))
    }
}

// =============================================================================
// Database Error Conversion
// =============================================================================

#[cfg(feature = "database")]
impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        use sea_orm::{DbErr, SqlErr};

        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => {
                return AppError::ConstraintViolation(msg)
            }
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
                return AppError::ConstraintViolation(msg)
            }
            _ => {}
        }

        match err {
            DbErr::RecordNotFound(_) | DbErr::RecordNotUpdated => AppError::NotFound,
            other => AppError::Database(other),
        }
    }
}

// =============================================================================
// Domain Error Conversion
// =============================================================================

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => AppError::Validation(msg),
            DomainError::NotFound(_) => AppError::NotFound,
            DomainError::Conflict(msg) => AppError::Conflict(msg),
            DomainError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Extension trait for Option -> AppError conversion
pub trait OptionExt<T> {
    fn ok_or_not_found(self) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self) -> AppResult<T> {
        self.ok_or(AppError::NotFound)
    }
}

/// Convenience constructors
impl AppError {
    pub fn conflict(entity: impl Into<String>) -> Self {
        AppError::Conflict(entity.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        AppError::ConstraintViolation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
