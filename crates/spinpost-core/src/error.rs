use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpinpostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Campaign conflict: campaign {active} is already running")]
    CampaignConflict { active: String },

    #[error("Campaign not found: {id}")]
    CampaignNotFound { id: String },

    #[error("Entitlement exhausted: no credits left")]
    EntitlementExhausted,

    #[error("Incomplete transfer {transfer_id}: {received}/{expected} chunks")]
    IncompleteTransfer {
        transfer_id: String,
        received: usize,
        expected: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpinpostError {
    /// Short error code string returned to control-surface clients.
    pub fn code(&self) -> &'static str {
        match self {
            SpinpostError::Config(_) => "CONFIG_ERROR",
            SpinpostError::InvalidRequest(_) => "INVALID_PARAMS",
            SpinpostError::CampaignConflict { .. } => "CAMPAIGN_CONFLICT",
            SpinpostError::CampaignNotFound { .. } => "NOT_FOUND",
            SpinpostError::EntitlementExhausted => "ENTITLEMENT_EXHAUSTED",
            SpinpostError::IncompleteTransfer { .. } => "INCOMPLETE_TRANSFER",
            SpinpostError::NotFound(_) => "NOT_FOUND",
            SpinpostError::Database(_) => "DATABASE_ERROR",
            SpinpostError::Serialization(_) => "SERIALIZATION_ERROR",
            SpinpostError::Io(_) => "IO_ERROR",
            SpinpostError::Timeout { .. } => "TIMEOUT",
            SpinpostError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SpinpostError>;
