//! `spinpost-transfer` — moving binary media between isolated contexts.
//!
//! * Upload: the sender slices a payload into tagged chunks; the
//!   [`upload::UploadAssembler`] buffers them sparsely per transfer and
//!   [`finalize`](upload::UploadAssembler::finalize) writes one immutable blob
//!   into the [`archive::MediaArchive`] only when every index is present.
//! * Download: the [`download::DownloadStreamer`] reads a stored blob one
//!   byte range at a time and sends the next slice only after the receiver
//!   acknowledged the previous one.

pub mod archive;
pub mod download;
pub mod error;
pub mod upload;

pub use archive::{MediaArchive, MediaMeta};
pub use download::{Ack, CreditGate, DownloadStreamer, FrameSink, StreamSummary};
pub use error::{Result, TransferError};
pub use upload::{ChunkProgress, UploadAssembler};
