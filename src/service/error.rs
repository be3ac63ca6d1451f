use thiserror::Error;
use uuid::Uuid;
use axum::http::StatusCode;
use validator::ValidationErrors;

use crate::{
    error::HttpError,
    models::dispatchmodel::RoundStatus,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Dispatch round {0} not found")]
    RoundNotFound(Uuid),

    #[error("Settlement record {0} not found")]
    SettlementNotFound(Uuid),

    #[error("No settlement preview for order {0}")]
    PreviewNotFound(Uuid),

    #[error("Dispatch round {0} is {1:?} and cannot be settled")]
    InvalidRoundStatus(Uuid, RoundStatus),

    #[error("Dispatch round {0} is already being settled")]
    RoundLocked(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input was wrong; fix it before calling again.
    BadInput,
    /// Another caller got there first; resubmit later.
    Resubmit,
    /// Stored data violates a ledger invariant; needs manual investigation.
    DataProblem,
    Missing,
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::OrderNotFound(_)
            | ServiceError::RoundNotFound(_)
            | ServiceError::SettlementNotFound(_)
            | ServiceError::PreviewNotFound(_) => ErrorKind::Missing,

            ServiceError::Validation(_) => ErrorKind::BadInput,

            ServiceError::InvalidRoundStatus(_, _)
            | ServiceError::RoundLocked(_)
            | ServiceError::Conflict(_) => ErrorKind::Resubmit,

            ServiceError::Consistency(_) => ErrorKind::DataProblem,

            ServiceError::Database(err) if is_contention(err) => ErrorKind::Resubmit,
            ServiceError::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Missing => StatusCode::NOT_FOUND,
            ErrorKind::BadInput => StatusCode::BAD_REQUEST,
            ErrorKind::Resubmit => StatusCode::CONFLICT,
            ErrorKind::DataProblem => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        ServiceError::Consistency(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }
}

/// Unique violations and serialization failures mean a concurrent writer won.
fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("23505") | Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        match error.kind() {
            ErrorKind::Internal => {
                tracing::error!("settlement engine failure: {}", error);
                HttpError::server_error("An internal error occurred")
            }
            _ => HttpError::new(error.to_string(), status),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(errors.to_string())
    }
}
