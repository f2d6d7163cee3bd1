use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spinpost_store::collections::{MEDIA, MEDIA_META};
use spinpost_store::{Repository, RepositoryExt};
use tracing::{info, warn};

use crate::error::{Result, TransferError};

/// Metadata stored next to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub id: String,
    pub mime_type: String,
    pub size: u64,
    /// Hex SHA-256 of the payload.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Durable, write-once blob storage keyed by transfer id.
///
/// A blob counts as present only once its metadata row exists; the payload
/// row is written first so a reader never sees metadata without bytes.
#[derive(Clone)]
pub struct MediaArchive {
    repo: Arc<dyn Repository>,
}

impl MediaArchive {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Persist `payload` under `id`. Fails with `AlreadyStored` if a complete
    /// blob already exists.
    pub fn store(&self, id: &str, mime_type: &str, payload: &[u8]) -> Result<MediaMeta> {
        if self.meta(id)?.is_some() {
            return Err(TransferError::AlreadyStored(id.to_string()));
        }
        if !self.repo.insert_if_absent(MEDIA, id, payload)? {
            // Bytes without metadata: a previous process died between the
            // two writes. The old bytes were never visible, replace them.
            warn!(media_id = id, "replacing orphaned media payload");
            self.repo.put(MEDIA, id, payload)?;
        }

        let meta = MediaMeta {
            id: id.to_string(),
            mime_type: mime_type.to_string(),
            size: payload.len() as u64,
            sha256: hex::encode(Sha256::digest(payload)),
            created_at: Utc::now(),
        };
        self.repo.put_json(MEDIA_META, id, &meta)?;
        info!(media_id = id, size = meta.size, mime = %meta.mime_type, "media stored");
        Ok(meta)
    }

    pub fn meta(&self, id: &str) -> Result<Option<MediaMeta>> {
        Ok(self.repo.get_json(MEDIA_META, id)?)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.meta(id)?.is_some())
    }

    /// Load a whole blob. Used when a submit needs the bytes in-process.
    pub fn read(&self, id: &str) -> Result<Option<(MediaMeta, Vec<u8>)>> {
        let Some(meta) = self.meta(id)? else {
            return Ok(None);
        };
        let bytes = self
            .repo
            .get(MEDIA, id)?
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
        Ok(Some((meta, bytes)))
    }

    /// Read one byte range without loading the rest of the blob.
    pub fn read_range(&self, id: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.repo
            .read_range(MEDIA, id, offset, len)?
            .ok_or_else(|| TransferError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        // metadata first: the blob disappears atomically from readers' view
        let had_meta = self.repo.delete(MEDIA_META, id)?;
        let had_bytes = self.repo.delete(MEDIA, id)?;
        if !had_meta && !had_bytes {
            return Err(TransferError::NotFound(id.to_string()));
        }
        info!(media_id = id, "media deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<MediaMeta>> {
        Ok(self.repo.list_json(MEDIA_META)?)
    }
}
