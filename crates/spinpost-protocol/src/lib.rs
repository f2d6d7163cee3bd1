//! Wire types for the spinpost control surface and the media channel.

pub mod commands;
pub mod frames;
pub mod media;

pub use commands::{Command, StartReply, StatusReply};
pub use frames::{ErrorShape, ReqFrame, ResFrame};
pub use media::{ClientMediaFrame, DownloadFrame, UploadChunk};
