//! Dispatch error taxonomy

use thiserror::Error;

use crate::store::StoreError;

/// Failure kinds callers can distinguish. Nothing else leaves the crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("duplicate request: {key}")]
    DuplicateRequest { key: String },

    #[error("no driver available within {radius_m} m")]
    NoDriverAvailable { radius_m: u32 },

    #[error("matching temporarily unavailable")]
    MatchingUnavailable,

    #[error("store temporarily unavailable")]
    StoreUnavailable,

    #[error("{label} timed out after {deadline_ms} ms")]
    Timeout { label: String, deadline_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            DispatchError::NoDriverAvailable { .. } => "NO_DRIVER_AVAILABLE",
            DispatchError::MatchingUnavailable => "MATCHING_UNAVAILABLE",
            DispatchError::StoreUnavailable => "STORE_UNAVAILABLE",
            DispatchError::Timeout { .. } => "TIMEOUT",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Circuit open or deadline exceeded somewhere below
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            DispatchError::StoreUnavailable
                | DispatchError::MatchingUnavailable
                | DispatchError::Timeout { .. }
        )
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::Internal(err.to_string())
    }
}

impl From<common::Error> for DispatchError {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::InvalidInput(msg) => DispatchError::Validation(msg),
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
