use std::fmt;

use thiserror::Error;

use crate::task::TaskId;

/// Outcome vocabulary of a sync call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("session rejected by server")]
    Unauthorized,

    #[error("task not found on server")]
    NotFound,

    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected payload: {0}")]
    Validation(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    DueDate,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::DueDate => "due_date",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no active session")]
pub struct Unauthenticated;

/// Every failure a store operation reports to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid task: {}", describe_fields(.0))]
    Invalid(Vec<FieldError>),

    #[error("not logged in or session expired")]
    Unauthenticated,

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected the request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn requires_login(&self) -> bool {
        matches!(self, StoreError::Unauthenticated)
    }

    /// Failures the user may fix by simply reissuing the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            StoreError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

impl From<Unauthenticated> for StoreError {
    fn from(_: Unauthenticated) -> Self {
        StoreError::Unauthenticated
    }
}

impl From<Vec<FieldError>> for StoreError {
    fn from(errors: Vec<FieldError>) -> Self {
        StoreError::Invalid(errors)
    }
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
