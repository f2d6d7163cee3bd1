use spinpost_core::SpinpostError;
use spinpost_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided schedule definition is invalid.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The campaign launcher failed outright (not a rejection).
    #[error("Launch failed: {0}")]
    Launch(String),
}

impl From<SchedulerError> for SpinpostError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvalidSchedule(msg) => SpinpostError::InvalidRequest(msg),
            SchedulerError::ScheduleNotFound { id } => SpinpostError::NotFound(id),
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Launch(msg) => SpinpostError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
