use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use spinpost_protocol::UploadChunk;
use tracing::{debug, info, warn};

use crate::archive::{MediaArchive, MediaMeta};
use crate::error::{Result, TransferError};

/// In-memory buffer for one upload. Never persisted: a restart mid-upload
/// drops it and the sender starts over.
struct ChunkSession {
    expected: u32,
    mime_type: String,
    /// Sparse: only indices that actually arrived take memory.
    chunks: BTreeMap<u32, Vec<u8>>,
    last_activity: Instant,
}

impl ChunkSession {
    fn new(expected: u32, mime_type: &str) -> Self {
        Self {
            expected,
            mime_type: mime_type.to_string(),
            chunks: BTreeMap::new(),
            last_activity: Instant::now(),
        }
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.expected)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.expected as usize
    }
}

/// Accepted-chunk acknowledgement returned to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChunkProgress {
    pub received: usize,
    pub expected: u32,
}

/// Receiver side of the chunked upload.
pub struct UploadAssembler {
    sessions: DashMap<String, ChunkSession>,
    archive: MediaArchive,
    /// Largest `total_count` a sender may announce.
    max_chunks: u32,
}

impl UploadAssembler {
    pub fn new(archive: MediaArchive, max_chunks: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            archive,
            max_chunks: max_chunks.max(1),
        }
    }

    /// Decode and buffer a wire chunk.
    pub fn accept_chunk(&self, chunk: &UploadChunk) -> Result<ChunkProgress> {
        let bytes = chunk
            .decode()
            .map_err(|e| TransferError::BadPayload(e.to_string()))?;
        self.accept(
            &chunk.transfer_id,
            chunk.index,
            chunk.total_count,
            &chunk.mime_type,
            bytes,
        )
    }

    /// Buffer one chunk. Chunks may arrive in any order; a resent index
    /// replaces the earlier copy.
    pub fn accept(
        &self,
        transfer_id: &str,
        index: u32,
        total_count: u32,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ChunkProgress> {
        if total_count == 0 || index >= total_count {
            return Err(TransferError::ChunkOutOfRange { index, total_count });
        }
        if total_count > self.max_chunks {
            warn!(transfer_id, total_count, max = self.max_chunks, "upload refused: too many chunks");
            return Err(TransferError::TooManyChunks {
                total_count,
                max: self.max_chunks,
            });
        }

        let mut session = self
            .sessions
            .entry(transfer_id.to_string())
            .or_insert_with(|| {
                debug!(transfer_id, total_count, "upload session opened");
                ChunkSession::new(total_count, mime_type)
            });

        if session.expected != total_count {
            return Err(TransferError::MismatchedTotal {
                transfer_id: transfer_id.to_string(),
                expected: session.expected,
                got: total_count,
            });
        }

        session.chunks.insert(index, bytes);
        session.last_activity = Instant::now();

        Ok(ChunkProgress {
            received: session.chunks.len(),
            expected: session.expected,
        })
    }

    /// Assemble and persist the blob under `transfer_id`.
    ///
    /// Succeeds only when every index in `0..total_count` is populated. On
    /// `IncompleteTransfer` nothing is written and the session stays open so
    /// the sender can fill the gaps and finalize again.
    pub fn finalize(&self, transfer_id: &str) -> Result<MediaMeta> {
        {
            let session = self
                .sessions
                .get(transfer_id)
                .ok_or_else(|| TransferError::UnknownTransfer(transfer_id.to_string()))?;
            if !session.is_complete() {
                let missing = session.missing();
                warn!(transfer_id, missing = ?missing, "finalize before all chunks arrived");
                return Err(TransferError::IncompleteTransfer {
                    transfer_id: transfer_id.to_string(),
                    received: session.chunks.len(),
                    expected: session.expected as usize,
                    missing,
                });
            }
        }

        let (_, session) = self
            .sessions
            .remove(transfer_id)
            .ok_or_else(|| TransferError::UnknownTransfer(transfer_id.to_string()))?;

        let total: usize = session.chunks.values().map(Vec::len).sum();
        let mut payload = Vec::with_capacity(total);
        for chunk in session.chunks.into_values() {
            payload.extend_from_slice(&chunk);
        }

        let meta = self.archive.store(transfer_id, &session.mime_type, &payload)?;
        info!(
            transfer_id,
            chunks = session.expected,
            bytes = meta.size,
            "upload finalized"
        );
        Ok(meta)
    }

    /// Drop a session without storing anything. Returns whether one existed.
    pub fn abandon(&self, transfer_id: &str) -> bool {
        self.sessions.remove(transfer_id).is_some()
    }

    /// Drop sessions with no chunk activity for `idle`. Returns the count.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.last_activity.elapsed() < idle);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            warn!(evicted, "abandoned idle upload sessions");
        }
        evicted
    }

    pub fn in_flight(&self) -> usize {
        self.sessions.len()
    }
}
