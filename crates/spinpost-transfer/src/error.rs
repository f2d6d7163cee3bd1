use spinpost_core::SpinpostError;
use spinpost_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Finalize was called before every chunk arrived. Nothing was stored.
    #[error("Incomplete transfer {transfer_id}: {received}/{expected} chunks, missing {missing:?}")]
    IncompleteTransfer {
        transfer_id: String,
        received: usize,
        expected: usize,
        missing: Vec<u32>,
    },

    /// No upload session exists for this id (never started, finalized, or
    /// lost in a restart).
    #[error("Unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("Chunk index {index} out of range for {total_count} chunks")]
    ChunkOutOfRange { index: u32, total_count: u32 },

    #[error("Transfer of {total_count} chunks exceeds the {max}-chunk limit")]
    TooManyChunks { total_count: u32, max: u32 },

    #[error("Transfer {transfer_id} started with {expected} chunks, chunk says {got}")]
    MismatchedTotal {
        transfer_id: String,
        expected: u32,
        got: u32,
    },

    #[error("Chunk payload is not valid hex: {0}")]
    BadPayload(String),

    /// A blob with this id already exists; blobs are write-once.
    #[error("Media already stored: {0}")]
    AlreadyStored(String),

    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("No ack for {id}#{index} within {ms}ms")]
    AckTimeout { id: String, index: u32, ms: u64 },

    #[error("Media channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TransferError> for SpinpostError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::IncompleteTransfer {
                transfer_id,
                received,
                expected,
                ..
            } => SpinpostError::IncompleteTransfer {
                transfer_id,
                received,
                expected,
            },
            TransferError::UnknownTransfer(id) | TransferError::NotFound(id) => {
                SpinpostError::NotFound(id)
            }
            TransferError::AckTimeout { ms, .. } => SpinpostError::Timeout { ms },
            TransferError::Store(e) => e.into(),
            other @ (TransferError::ChunkOutOfRange { .. }
            | TransferError::TooManyChunks { .. }
            | TransferError::MismatchedTotal { .. }
            | TransferError::BadPayload(_)
            | TransferError::AlreadyStored(_)) => SpinpostError::InvalidRequest(other.to_string()),
            TransferError::ChannelClosed => SpinpostError::Internal("media channel closed".into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
