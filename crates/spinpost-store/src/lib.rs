//! `spinpost-store` — durable state for an ephemeral host process.
//!
//! # Overview
//!
//! Everything lives in one SQLite `kv` table partitioned by collection. The
//! [`repo::Repository`] trait is the only storage seam: the media archive,
//! the schedule store, the campaign store, the triggered ledger and the
//! [`state::StateStore`] all go through it.
//!
//! | Collection    | Contents                                  |
//! |---------------|-------------------------------------------|
//! | `run_flags`   | `{is_running, active_campaign_id, is_stopping}` |
//! | `progress`    | progress text + started/done marker       |
//! | `campaigns`   | campaign records with outcomes            |
//! | `schedules`   | stored schedules                          |
//! | `triggered`   | fired schedule occurrences                |
//! | `media`       | immutable media blobs                     |
//! | `media_meta`  | blob metadata (mime, size, digest)        |
//!
//! If the database cannot be opened the process runs memory-only via
//! [`repo::MemoryRepository`] and logs a degraded-durability warning.

pub mod campaigns;
pub mod db;
pub mod error;
pub mod ledger;
pub mod repo;
pub mod state;

pub use campaigns::CampaignStore;
pub use error::{Result, StoreError};
pub use ledger::TriggeredLedger;
pub use repo::{open_repository, MemoryRepository, Repository, RepositoryExt, SqliteRepository};
pub use state::StateStore;

/// Collection names used across crates.
pub mod collections {
    pub const RUN_FLAGS: &str = "run_flags";
    pub const PROGRESS: &str = "progress";
    pub const CAMPAIGNS: &str = "campaigns";
    pub const SCHEDULES: &str = "schedules";
    pub const TRIGGERED: &str = "triggered";
    pub const MEDIA: &str = "media";
    pub const MEDIA_META: &str = "media_meta";
}
