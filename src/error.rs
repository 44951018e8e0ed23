//! Error types for the Shelfshare loan ledger

use thiserror::Error;

/// Numeric error codes handed to the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    Conflict = 5,
    Unavailable = 6,
    BadConfig = 7,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Referenced book, loan or user is missing (or the book is archived)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested transition is not allowed in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller is not allowed to act on this loan
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A downstream collaborator (notification, email) failed
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Error code for the boundary layer
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Unauthorized(_) => ErrorCode::NotAuthorized,
            AppError::Unavailable(_) => ErrorCode::Unavailable,
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                ErrorCode::DbFailure
            }
            AppError::Config(_) => ErrorCode::BadConfig,
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorCode::Failure
            }
        }
    }

    /// True for failures caused by a broken business rule rather than by
    /// infrastructure. These never leave a partial mutation behind.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_) | AppError::Conflict(_) | AppError::Unauthorized(_)
        )
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

/// Translate storage-level failures that stand for a lost race into `Conflict`.
///
/// `23505` is a unique violation (the one-open-loan index), `55P03` is
/// `lock_not_available` raised when `lock_timeout` expires.
pub(crate) fn map_contention(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => {
                return AppError::Conflict("Book already has an open loan".to_string())
            }
            Some("55P03") => {
                return AppError::Conflict("Book is being modified by another request".to_string())
            }
            _ => {}
        }
    }
    AppError::Database(err)
}
