//! Error types for the reminder core.
//!
//! Gateway failures are not errors here: the gateway reports success/failure
//! as data and the engine records the outcome. These types cover store
//! faults and referential gaps (missing patient/caregiver rows), classified
//! by whether a later tick can succeed where this one failed.

use thiserror::Error;

use crate::db::DbError;

/// Errors from the escalation engine's send and sweep paths.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Db(#[from] DbError),

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Caregiver not found: {0}")]
    CaregiverNotFound(String),

    #[error("Medication not found: {0}")]
    MedicationNotFound(String),
}

impl EngineError {
    /// True when retrying on a later tick can succeed (transient store
    /// faults). Referential gaps need operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Db(_))
    }
}

/// Errors from the externally-triggered confirmation path. Callers need to
/// distinguish a bad id from an unavailable store.
#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("Reminder not found: {0}")]
    ReminderNotFound(String),

    #[error("Store error: {0}")]
    Db(#[from] DbError),
}
