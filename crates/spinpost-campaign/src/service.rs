use std::collections::HashSet;
use std::sync::Arc;

use spinpost_core::{Campaign, CampaignId, CampaignRequest, EntitlementState};
use spinpost_protocol::{StartReply, StatusReply};
use tracing::{info, warn};

use crate::error::{CampaignError, Result};
use crate::orchestrator::Orchestrator;

/// Control surface for campaigns: what the RPC layer and the scheduler call.
#[derive(Clone)]
pub struct CampaignService {
    orchestrator: Arc<Orchestrator>,
}

impl CampaignService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// `startCampaign`. Malformed input is an error; a refused start
    /// (conflict, no credits, vanished record) is a `Rejected` reply.
    pub async fn start_campaign(&self, request: CampaignRequest) -> Result<StartReply> {
        self.launch(request, None).await
    }

    /// Start on behalf of a stored schedule. Same gate as a direct start.
    pub async fn launch_scheduled(&self, schedule_id: &str, request: CampaignRequest) -> Result<StartReply> {
        self.launch(request, Some(schedule_id.to_string())).await
    }

    async fn launch(&self, request: CampaignRequest, schedule_id: Option<String>) -> Result<StartReply> {
        validate(&request)?;

        // Reject before creating anything so a conflict leaves no trace.
        let flags = self.orchestrator.state().flags();
        if flags.is_running {
            let active = flags
                .active_campaign_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Ok(StartReply::Rejected {
                reason: CampaignError::CampaignConflict { active }.to_string(),
            });
        }

        let campaign = Campaign::from_request(request, schedule_id);
        let id = campaign.id.clone();
        let campaigns = self.orchestrator.campaigns();
        campaigns.put(&campaign)?;

        match self.orchestrator.start(&id).await {
            Ok(_handle) => Ok(StartReply::Accepted { campaign_id: id }),
            Err(e) => {
                if let Err(del) = campaigns.delete(&id) {
                    warn!(campaign_id = %id, error = %del, "failed to discard rejected campaign");
                }
                match e {
                    CampaignError::CampaignConflict { .. }
                    | CampaignError::EntitlementExhausted
                    | CampaignError::StaleCampaign(_) => {
                        info!(campaign_id = %id, reason = %e, "start rejected");
                        Ok(StartReply::Rejected {
                            reason: e.to_string(),
                        })
                    }
                    other => Err(other),
                }
            }
        }
    }

    /// `stopCampaign`. Returns whether a run was signalled.
    pub fn stop_campaign(&self) -> bool {
        let signalled = self.orchestrator.state().request_stop();
        if signalled {
            info!("stop requested");
        }
        signalled
    }

    /// `resetStaleState`. A start or run in progress here is stopped cleanly
    /// and keeps the slot until it exits; otherwise the flags are forced idle
    /// and leftover active records are closed out.
    pub fn reset_stale_state(&self) -> Result<()> {
        if let Some(live) = self.orchestrator.reset_if_idle() {
            info!(campaign_id = %live, "reset requested while running, stopping instead");
            self.orchestrator.state().request_stop();
            return Ok(());
        }
        let recovered = self.orchestrator.campaigns().recover_interrupted()?;
        self.orchestrator.state().set_progress("", false, false);
        info!(recovered, "stale run state cleared");
        Ok(())
    }

    /// `deleteCampaign`. A running loop notices at its next check and aborts
    /// without attempting further destinations.
    pub fn delete_campaign(&self, id: &CampaignId) -> Result<()> {
        self.orchestrator.campaigns().delete(id).map_err(|e| match e {
            spinpost_store::StoreError::NotFound { .. } => CampaignError::NotFound(id.to_string()),
            other => other.into(),
        })
    }

    /// `getStatus`.
    pub fn status(&self) -> Result<StatusReply> {
        let progress = self.orchestrator.state().progress();
        let campaign = match self.orchestrator.state().flags().active_campaign_id {
            Some(id) => self.orchestrator.campaigns().get(&id)?,
            None => self.orchestrator.campaigns().list()?.pop(),
        };
        Ok(StatusReply {
            progress_text: progress.text,
            started: progress.started,
            done: progress.done,
            campaign_id: campaign.as_ref().map(|c| c.id.clone()),
            status: campaign.map(|c| c.status),
        })
    }

    pub fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.orchestrator.campaigns().list()?)
    }

    /// `getEntitlement`: a fresh server read, falling back to the cached
    /// answer when the service is unreachable.
    pub async fn entitlement(&self) -> Result<Option<EntitlementState>> {
        let gate = self.orchestrator.entitlement();
        match gate.refresh().await {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(error = %e, "entitlement refresh failed, serving cached value");
                Ok(gate.cached())
            }
        }
    }
}

fn validate(request: &CampaignRequest) -> Result<()> {
    if request.destinations.is_empty() {
        return Err(CampaignError::InvalidRequest(
            "at least one destination is required".to_string(),
        ));
    }
    if request.template.trim().is_empty() && request.media_refs.is_empty() {
        return Err(CampaignError::InvalidRequest(
            "template or media is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for d in &request.destinations {
        if d.id.trim().is_empty() {
            return Err(CampaignError::InvalidRequest("empty destination id".to_string()));
        }
        if !seen.insert(d.id.as_str()) {
            return Err(CampaignError::InvalidRequest(format!(
                "duplicate destination: {}",
                d.id
            )));
        }
    }
    Ok(())
}
