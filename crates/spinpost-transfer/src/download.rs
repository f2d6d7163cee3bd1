use std::time::Duration;

use async_trait::async_trait;
use spinpost_protocol::DownloadFrame;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::archive::MediaArchive;
use crate::error::{Result, TransferError};

/// Receiver's acknowledgement of one delivered chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub id: String,
    pub index: u32,
}

/// Outbound half of the long-lived media channel.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: DownloadFrame) -> Result<()>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<DownloadFrame> {
    async fn send(&mut self, frame: DownloadFrame) -> Result<()> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| TransferError::ChannelClosed)
    }
}

/// Credit-based flow control: one credit per chunk, granted by the matching
/// ack. The sender holds at most one unacknowledged slice at a time.
pub struct CreditGate {
    acks: mpsc::Receiver<Ack>,
    timeout: Duration,
}

impl CreditGate {
    pub fn new(acks: mpsc::Receiver<Ack>, timeout: Duration) -> Self {
        Self { acks, timeout }
    }

    /// Block until the ack for `id#index` arrives.
    ///
    /// Acks for anything else (late duplicates, other ids) are dropped.
    pub async fn wait_for(&mut self, id: &str, index: u32) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.acks.recv()).await {
                Ok(Some(ack)) if ack.id == id && ack.index == index => return Ok(()),
                Ok(Some(ack)) => {
                    debug!(expected_id = id, expected_index = index, got_id = %ack.id, got_index = ack.index, "ignoring stray ack");
                }
                Ok(None) => return Err(TransferError::ChannelClosed),
                Err(_) => {
                    return Err(TransferError::AckTimeout {
                        id: id.to_string(),
                        index,
                        ms: self.timeout.as_millis() as u64,
                    })
                }
            }
        }
    }
}

/// Per-item tally of one streaming session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub delivered: Vec<String>,
    pub not_found: Vec<String>,
}

/// Sender side of the ack-paced download.
pub struct DownloadStreamer {
    archive: MediaArchive,
    chunk_size: usize,
}

impl DownloadStreamer {
    pub fn new(archive: MediaArchive, chunk_size: usize) -> Self {
        Self {
            archive,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stream queued items in order.
    ///
    /// For each id: send a slice, wait for its ack, repeat; then send `Done`.
    /// A missing blob yields `NotFound` and no chunk. Ack timeouts and a
    /// closed channel end the whole session.
    pub async fn stream(
        &self,
        ids: &[String],
        sink: &mut dyn FrameSink,
        credits: &mut CreditGate,
    ) -> Result<StreamSummary> {
        let mut summary = StreamSummary::default();
        for id in ids {
            if self.stream_one(id, sink, credits).await? {
                summary.delivered.push(id.clone());
            } else {
                summary.not_found.push(id.clone());
            }
        }
        Ok(summary)
    }

    /// Returns `false` when the blob does not exist.
    async fn stream_one(
        &self,
        id: &str,
        sink: &mut dyn FrameSink,
        credits: &mut CreditGate,
    ) -> Result<bool> {
        let Some(meta) = self.archive.meta(id)? else {
            warn!(media_id = id, "download requested for missing media");
            sink.send(DownloadFrame::NotFound { id: id.to_string() })
                .await?;
            return Ok(false);
        };

        let total_count = meta.size.div_ceil(self.chunk_size as u64) as u32;
        for index in 0..total_count {
            let offset = index as u64 * self.chunk_size as u64;
            let slice = self.archive.read_range(id, offset, self.chunk_size)?;
            sink.send(DownloadFrame::Chunk {
                id: id.to_string(),
                index,
                total_count,
                mime_type: meta.mime_type.clone(),
                data_hex: hex::encode(&slice),
            })
            .await?;
            drop(slice);
            credits.wait_for(id, index).await?;
        }

        sink.send(DownloadFrame::Done { id: id.to_string() }).await?;
        info!(media_id = id, chunks = total_count, bytes = meta.size, "media streamed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinpost_store::MemoryRepository;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn credit_gate_times_out_without_ack() {
        let (_tx, rx) = mpsc::channel(4);
        let mut gate = CreditGate::new(rx, Duration::from_secs(5));
        let err = gate.wait_for("m", 0).await.unwrap_err();
        assert!(matches!(err, TransferError::AckTimeout { index: 0, .. }));
    }

    #[tokio::test]
    async fn credit_gate_skips_stray_acks() {
        let (tx, rx) = mpsc::channel(4);
        let mut gate = CreditGate::new(rx, Duration::from_secs(5));
        tx.send(Ack { id: "other".into(), index: 0 }).await.unwrap();
        tx.send(Ack { id: "m".into(), index: 1 }).await.unwrap();
        tx.send(Ack { id: "m".into(), index: 0 }).await.unwrap();
        gate.wait_for("m", 0).await.unwrap();
    }

    #[tokio::test]
    async fn empty_blob_sends_only_done() {
        let archive = MediaArchive::new(Arc::new(MemoryRepository::new()));
        archive.store("e", "text/plain", b"").unwrap();
        let streamer = DownloadStreamer::new(archive, 4);
        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let (_ack_tx, ack_rx) = mpsc::channel(4);
        let mut sink = frame_tx;
        let mut gate = CreditGate::new(ack_rx, Duration::from_secs(1));

        let summary = streamer
            .stream(&["e".to_string()], &mut sink, &mut gate)
            .await
            .unwrap();
        assert_eq!(summary.delivered, vec!["e"]);
        assert_eq!(
            frame_rx.recv().await,
            Some(DownloadFrame::Done { id: "e".into() })
        );
    }
}
