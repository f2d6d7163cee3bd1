use spinpost_core::SpinpostError;
use spinpost_store::StoreError;
use spinpost_transfer::TransferError;
use thiserror::Error;

use crate::entitlement::EntitlementError;

/// Errors raised by the campaign engine.
///
/// Per-destination failures (`TransientAcquisition`, `SubmissionTimeout`)
/// are recorded as outcomes and never abort the remaining sequence.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Start requested while another campaign holds the run slot.
    #[error("Campaign conflict: {active} is already running")]
    CampaignConflict { active: String },

    /// The campaign record vanished between request and execution.
    #[error("Campaign {0} no longer exists")]
    StaleCampaign(String),

    /// The account has no credits and is not premium.
    #[error("No credits left")]
    EntitlementExhausted,

    #[error("Entitlement check failed: {0}")]
    Entitlement(#[from] EntitlementError),

    /// The destination context could not be opened after all retries.
    #[error("Could not open destination {destination} after {attempts} attempts: {reason}")]
    TransientAcquisition {
        destination: String,
        attempts: u32,
        reason: String,
    },

    /// No terminal signal arrived within the submit timeout.
    #[error("No result from destination {destination} within {secs}s")]
    SubmissionTimeout { destination: String, secs: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Campaign not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Media(#[from] TransferError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CampaignError> for SpinpostError {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::CampaignConflict { active } => SpinpostError::CampaignConflict { active },
            CampaignError::EntitlementExhausted => SpinpostError::EntitlementExhausted,
            CampaignError::StaleCampaign(id) | CampaignError::NotFound(id) => {
                SpinpostError::CampaignNotFound { id }
            }
            CampaignError::SubmissionTimeout { secs, .. } => {
                SpinpostError::Timeout { ms: secs * 1000 }
            }
            CampaignError::InvalidRequest(msg) => SpinpostError::InvalidRequest(msg),
            CampaignError::Media(e) => e.into(),
            CampaignError::Store(e) => e.into(),
            other => SpinpostError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CampaignError>;
