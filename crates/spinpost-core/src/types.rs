use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a campaign (UUIDv7 — time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CampaignId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CampaignId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One target location receiving a single post attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

/// How the run loop spaces out consecutive posts.
///
/// A campaign without an explicit policy falls back to the built-in jittered
/// default (see `spinpost_campaign::pacing`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PacingPolicy {
    /// Never wait between posts.
    Continuous,
    /// Wait `wait_minutes` after every `batch_size` posts.
    Throttled {
        batch_size: u32,
        wait_minutes: u32,
        #[serde(default)]
        randomize_wait: bool,
    },
}

/// Lifecycle of a campaign run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Idle,
    Starting,
    Posting,
    Waiting,
    Completed,
    Stopped,
    Failed,
}

impl CampaignStatus {
    /// States covered by the global run mutex.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CampaignStatus::Starting | CampaignStatus::Posting | CampaignStatus::Waiting
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Failed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Idle => "idle",
            CampaignStatus::Starting => "starting",
            CampaignStatus::Posting => "posting",
            CampaignStatus::Waiting => "waiting",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Success,
    Failure,
    Cancelled,
}

/// Terminal result for one destination. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub destination_id: String,
    pub result: OutcomeResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// What a caller (user or scheduler) supplies to launch a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRequest {
    pub destinations: Vec<Destination>,
    pub template: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<PacingPolicy>,
}

/// A persisted campaign record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub destinations: Vec<Destination>,
    /// Raw template text; may contain `{a|b}` spintax groups.
    pub template: String,
    pub media_refs: Vec<String>,
    pub pacing: Option<PacingPolicy>,
    pub status: CampaignStatus,
    pub outcomes: Vec<DestinationOutcome>,
    /// Set when the campaign was launched by a stored schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn from_request(request: CampaignRequest, schedule_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CampaignId::new(),
            destinations: request.destinations,
            template: request.template,
            media_refs: request.media_refs,
            pacing: request.pacing,
            status: CampaignStatus::Idle,
            outcomes: Vec::new(),
            schedule_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_outcome(&self, destination_id: &str) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.destination_id == destination_id)
    }

    /// Append an outcome. Returns `false` (and changes nothing) when the
    /// destination already has one.
    pub fn record(
        &mut self,
        destination_id: &str,
        result: OutcomeResult,
        detail: Option<String>,
    ) -> bool {
        if self.has_outcome(destination_id) {
            return false;
        }
        let now = Utc::now();
        self.outcomes.push(DestinationOutcome {
            destination_id: destination_id.to_string(),
            result,
            detail,
            at: now,
        });
        self.updated_at = now;
        true
    }

    /// Record `result` for every destination that has no outcome yet.
    /// Returns how many were recorded.
    pub fn record_remaining(&mut self, result: OutcomeResult, detail: &str) -> usize {
        let pending: Vec<String> = self
            .destinations
            .iter()
            .filter(|d| !self.has_outcome(&d.id))
            .map(|d| d.id.clone())
            .collect();
        for id in &pending {
            self.record(id, result, Some(detail.to_string()));
        }
        pending.len()
    }

    pub fn set_status(&mut self, status: CampaignStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn count(&self, result: OutcomeResult) -> usize {
        self.outcomes.iter().filter(|o| o.result == result).count()
    }
}

/// Global run flags mirrored to durable storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    pub is_running: bool,
    pub active_campaign_id: Option<CampaignId>,
    pub is_stopping: bool,
}

impl RunFlags {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Human-readable progress line plus a started/done marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub text: String,
    pub started: bool,
    pub done: bool,
}

/// Last answer from the entitlement service. Display cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementState {
    pub premium: bool,
    pub credits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
}
