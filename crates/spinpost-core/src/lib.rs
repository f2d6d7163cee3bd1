//! `spinpost-core` — configuration, error type and domain records shared by
//! every spinpost crate.

pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::SpinpostConfig;
pub use error::{Result, SpinpostError};
pub use schedule::{Frequency, Schedule, ScheduleDraft};
pub use types::{
    Campaign, CampaignId, CampaignRequest, CampaignStatus, Destination, DestinationOutcome,
    EntitlementState, OutcomeResult, PacingPolicy, Progress, RunFlags,
};
