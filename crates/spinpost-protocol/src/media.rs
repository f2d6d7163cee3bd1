//! Frames for moving binary media between contexts.
//!
//! Payload bytes travel hex-encoded inside JSON text frames.

use serde::{Deserialize, Serialize};

/// One slice of an upload, tagged with its position in the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    pub transfer_id: String,
    pub index: u32,
    pub total_count: u32,
    pub mime_type: String,
    pub data_hex: String,
}

impl UploadChunk {
    pub fn new(transfer_id: &str, index: u32, total_count: u32, mime_type: &str, data: &[u8]) -> Self {
        Self {
            transfer_id: transfer_id.to_string(),
            index,
            total_count,
            mime_type: mime_type.to_string(),
            data_hex: hex::encode(data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.data_hex)
    }
}

/// Server → client frames on the download channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadFrame {
    Chunk {
        id: String,
        index: u32,
        total_count: u32,
        mime_type: String,
        data_hex: String,
    },
    /// Every chunk of `id` has been sent and acknowledged.
    Done { id: String },
    /// No blob is stored under `id`; no chunk will follow.
    NotFound { id: String },
    Error { id: String, message: String },
}

/// Client → server frames on the download channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMediaFrame {
    /// Queue blobs for download, streamed in the given order.
    Request { ids: Vec<String> },
    /// Grants the credit for the next chunk of `id`.
    Ack { id: String, index: u32 },
}
