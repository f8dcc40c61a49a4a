//! Error types for the tracking engine
//!
//! Every public operation returns an [`EngineResult`]. Callers that need to
//! pick a transport status use [`EngineError::kind`] instead of matching on
//! individual variants.

use thiserror::Error;

use crate::model::{EmployeeId, SessionId};

/// Failure reported by a [`crate::store::TrackingStore`] implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backend could not be reached; the operation did not happen and may be retried
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// Any other backend failure
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Coarse classification used by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Forbidden,
    Storage,
}

/// Error type for tracking engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("employee {0} already has an active session")]
    SessionAlreadyActive(EmployeeId),

    #[error("session {0} is already closed")]
    SessionAlreadyClosed(SessionId),

    #[error("employee {0} not found")]
    EmployeeNotFound(String),

    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Check-in attempted away from the employee's registered home circle
    #[error("check-in position is {distance_m:.0} m from home, allowed {radius_m:.0} m")]
    OutsideHomeRadius { distance_m: f64, radius_m: f64 },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SessionNotFound(_) | EngineError::EmployeeNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::InvalidCoordinate { .. } | EngineError::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            EngineError::SessionClosed(_)
            | EngineError::SessionAlreadyActive(_)
            | EngineError::SessionAlreadyClosed(_) => ErrorKind::Conflict,
            EngineError::OutsideHomeRadius { .. } => ErrorKind::Forbidden,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Type alias for Result with EngineError
pub type EngineResult<T> = Result<T, EngineError>;
