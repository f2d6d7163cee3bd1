use serde::{Deserialize, Serialize};
use spinpost_core::{CampaignId, CampaignStatus, Destination, PacingPolicy, ScheduleDraft};

use crate::media::UploadChunk;

/// Every control-surface operation, one variant per method.
///
/// Wire: `{ "method": "startCampaign", "params": { ... } }`. Methods without
/// parameters may omit `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Command {
    // campaigns
    StartCampaign {
        destinations: Vec<Destination>,
        template: String,
        #[serde(default)]
        media_refs: Vec<String>,
        #[serde(default)]
        pacing: Option<PacingPolicy>,
    },
    StopCampaign,
    ResetStaleState,
    DeleteCampaign {
        id: CampaignId,
    },
    GetStatus,
    ListCampaigns,

    // schedules
    AddSchedule(ScheduleDraft),
    ListSchedules,
    DeleteSchedule {
        id: String,
    },

    // media
    UploadChunk(UploadChunk),
    FinalizeUpload {
        transfer_id: String,
    },
    DeleteMedia {
        id: String,
    },

    // entitlement
    GetEntitlement,
}

impl Command {
    /// Wire method name, for logging.
    pub fn method(&self) -> &'static str {
        match self {
            Command::StartCampaign { .. } => "startCampaign",
            Command::StopCampaign => "stopCampaign",
            Command::ResetStaleState => "resetStaleState",
            Command::DeleteCampaign { .. } => "deleteCampaign",
            Command::GetStatus => "getStatus",
            Command::ListCampaigns => "listCampaigns",
            Command::AddSchedule(_) => "addSchedule",
            Command::ListSchedules => "listSchedules",
            Command::DeleteSchedule { .. } => "deleteSchedule",
            Command::UploadChunk(_) => "uploadChunk",
            Command::FinalizeUpload { .. } => "finalizeUpload",
            Command::DeleteMedia { .. } => "deleteMedia",
            Command::GetEntitlement => "getEntitlement",
        }
    }
}

/// Payload of a `startCampaign` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StartReply {
    Accepted { campaign_id: CampaignId },
    Rejected { reason: String },
}

/// Payload of a `getStatus` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub progress_text: String,
    pub started: bool,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<CampaignId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CampaignStatus>,
}
