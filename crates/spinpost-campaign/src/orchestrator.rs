use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use spinpost_core::config::OrchestratorConfig;
use spinpost_core::{Campaign, CampaignId, CampaignStatus, Destination, OutcomeResult};
use spinpost_store::{CampaignStore, StateStore};
use spinpost_transfer::{MediaArchive, TransferError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::driver::{Attachment, ContextHandle, ContextProvider, DriverError, Post, SubmitSignal, Submitter};
use crate::entitlement::EntitlementGate;
use crate::error::{CampaignError, Result};
use crate::pacing::{self, WaitOutcome};
use crate::spintax;

/// Run-loop timing, resolved from [`OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub acquire_attempts: u32,
    pub acquire_backoff_base: Duration,
    pub submit_timeout: Duration,
    pub pacing_poll: Duration,
    pub inter_post_yield: Duration,
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(cfg: &OrchestratorConfig) -> Self {
        Self {
            acquire_attempts: cfg.acquire_attempts.max(1),
            acquire_backoff_base: Duration::from_millis(cfg.acquire_backoff_base_ms),
            submit_timeout: Duration::from_secs(cfg.submit_timeout_secs),
            pacing_poll: Duration::from_secs(cfg.pacing_poll_secs.max(1)),
            inter_post_yield: Duration::from_millis(cfg.inter_post_yield_ms),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Result of one destination attempt.
#[derive(Debug)]
enum Attempt {
    Posted,
    Failed(String),
    /// Stop was requested before the submit went out.
    Interrupted,
    /// The campaign record vanished before the submit went out.
    Deleted,
}

/// How a run loop ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Stopped,
    Deleted,
    Exhausted,
}

/// Holds the global run slot for one campaign. Dropping it releases the
/// slot, so every exit path (return, error, panic in the supervisor) frees it.
struct RunGuard {
    orchestrator: Arc<Orchestrator>,
    id: CampaignId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut live = self.orchestrator.live.lock().unwrap();
            if live.as_ref() == Some(&self.id) {
                *live = None;
            }
        }
        self.orchestrator.state.release(&self.id);
    }
}

/// An open destination context. The normal path awaits
/// [`close`](Self::close); if the attempt unwinds instead, `Drop` hands the
/// handle to a fresh task so the context is still released.
struct ContextLease {
    contexts: Arc<dyn ContextProvider>,
    handle: ContextHandle,
    closed: bool,
}

impl ContextLease {
    async fn close(mut self) {
        self.closed = true;
        self.contexts.close(self.handle.clone()).await;
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let contexts = self.contexts.clone();
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                warn!(context_id = %handle.id, "attempt unwound, closing context in background");
                rt.spawn(async move { contexts.close(handle).await });
            }
            Err(_) => error!(context_id = %handle.id, "context leaked: no runtime to close it on"),
        }
    }
}

/// Sequential posting engine.
///
/// One campaign at a time, guarded by the run flags in the [`StateStore`].
/// Destinations are attempted strictly in list order; every outcome is
/// written through to the [`CampaignStore`] before the next step.
pub struct Orchestrator {
    state: Arc<StateStore>,
    campaigns: CampaignStore,
    archive: MediaArchive,
    contexts: Arc<dyn ContextProvider>,
    submitter: Arc<dyn Submitter>,
    entitlement: Arc<EntitlementGate>,
    settings: OrchestratorSettings,
    /// Campaign holding the run slot in this process, from the moment the
    /// slot is taken until the guard drops. Locked around slot acquisition
    /// and stale-state resets so neither can interleave with the other.
    live: Mutex<Option<CampaignId>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateStore>,
        campaigns: CampaignStore,
        archive: MediaArchive,
        contexts: Arc<dyn ContextProvider>,
        submitter: Arc<dyn Submitter>,
        entitlement: Arc<EntitlementGate>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            state,
            campaigns,
            archive,
            contexts,
            submitter,
            entitlement,
            settings,
            live: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn campaigns(&self) -> &CampaignStore {
        &self.campaigns
    }

    pub fn entitlement(&self) -> &Arc<EntitlementGate> {
        &self.entitlement
    }

    /// Id of the campaign starting or running in this process, if any.
    pub fn live_campaign(&self) -> Option<CampaignId> {
        self.live.lock().unwrap().clone()
    }

    /// Start a stored campaign.
    ///
    /// Synchronous part: take the run slot (`CampaignConflict` if held),
    /// re-read the record (`StaleCampaign` if gone), verify entitlement and
    /// load attachments. Nothing is attempted if any of these fail, and the
    /// slot is released again. On success the loop runs on a spawned task.
    pub async fn start(self: &Arc<Self>, id: &CampaignId) -> Result<JoinHandle<()>> {
        {
            let mut live = self.live.lock().unwrap();
            if let Err(held) = self.state.try_acquire(id) {
                let active = held
                    .active_campaign_id
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                warn!(campaign_id = %id, active = %active, "start rejected: run slot held");
                return Err(CampaignError::CampaignConflict { active });
            }
            *live = Some(id.clone());
        }
        let guard = RunGuard {
            orchestrator: self.clone(),
            id: id.clone(),
        };

        let Some(mut campaign) = self.campaigns.get(id)? else {
            info!(campaign_id = %id, "campaign vanished before start");
            return Err(CampaignError::StaleCampaign(id.to_string()));
        };

        self.entitlement.authorize_start().await?;
        let attachments = self.load_attachments(&campaign.media_refs)?;

        campaign.set_status(CampaignStatus::Starting);
        if !self.campaigns.update(&campaign)? {
            return Err(CampaignError::StaleCampaign(id.to_string()));
        }
        let total = campaign.destinations.len();
        self.state
            .set_progress(format!("Starting campaign (0/{total})"), true, false);
        info!(campaign_id = %id, destinations = total, "campaign started");

        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.supervise(campaign, attachments, guard).await;
        }))
    }

    /// Force the run flags idle, unless a start or run in this process holds
    /// the slot. Returns that holder instead of resetting.
    pub fn reset_if_idle(&self) -> Option<CampaignId> {
        let live = self.live.lock().unwrap();
        if let Some(holder) = live.as_ref() {
            return Some(holder.clone());
        }
        self.state.reset();
        None
    }

    /// Run the loop on its own task so a panic surfaces as a `JoinError`
    /// here instead of tearing down the supervisor. Either way the campaign
    /// ends in a terminal state and the guard releases the slot.
    async fn supervise(self: Arc<Self>, campaign: Campaign, attachments: Arc<[Attachment]>, guard: RunGuard) {
        let id = campaign.id.clone();
        let this = self.clone();
        let joined = tokio::spawn(async move { this.run(campaign, attachments).await }).await;

        match joined {
            Ok(Ok(end)) => debug!(campaign_id = %id, ?end, "run loop exited"),
            Ok(Err(e)) => {
                error!(campaign_id = %id, error = %e, "campaign run failed");
                self.fail(&id, &e.to_string());
            }
            Err(e) => {
                error!(campaign_id = %id, error = %e, "campaign run task aborted");
                self.fail(&id, "internal error");
            }
        }
        drop(guard);
    }

    async fn run(&self, mut campaign: Campaign, attachments: Arc<[Attachment]>) -> Result<RunEnd> {
        let total = campaign.destinations.len() as u32;
        let mut rng = StdRng::from_entropy();
        let destinations = campaign.destinations.clone();
        // set once a settled success leaves a non-premium account at zero
        let mut credits_spent = false;

        for (i, dest) in destinations.iter().enumerate() {
            let position = i as u32 + 1;

            if self.state.is_stopping() {
                return self.finish_stopped(campaign);
            }
            if !self.campaigns.exists(&campaign.id)? {
                return Ok(self.finish_deleted(&campaign.id));
            }
            if campaign.has_outcome(&dest.id) {
                continue;
            }
            if credits_spent {
                match self.entitlement.authorize_start().await {
                    Ok(_) => credits_spent = false,
                    Err(e) => return self.finish_exhausted(campaign, &e),
                }
            }

            campaign.set_status(CampaignStatus::Posting);
            if !self.campaigns.update(&campaign)? {
                return Ok(self.finish_deleted(&campaign.id));
            }
            self.state.set_progress(
                format!("Posting {position}/{total} to {}", display_name(dest)),
                true,
                false,
            );

            let text = spintax::expand_with(&campaign.template, &mut rng);
            let attempt = self
                .attempt(&campaign.id, dest, text, attachments.clone())
                .await?;

            match attempt {
                Attempt::Posted => {
                    campaign.record(&dest.id, OutcomeResult::Success, None);
                    if !self.campaigns.update(&campaign)? {
                        return Ok(self.finish_deleted(&campaign.id));
                    }
                    info!(campaign_id = %campaign.id, destination = %dest.id, position, total, "posted");
                    match self.entitlement.settle_success().await {
                        Ok(Some(0)) => credits_spent = true,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(campaign_id = %campaign.id, error = %e, "credit settlement failed")
                        }
                    }
                }
                Attempt::Failed(reason) => {
                    warn!(campaign_id = %campaign.id, destination = %dest.id, reason = %reason, "post failed");
                    campaign.record(&dest.id, OutcomeResult::Failure, Some(reason));
                    if !self.campaigns.update(&campaign)? {
                        return Ok(self.finish_deleted(&campaign.id));
                    }
                }
                Attempt::Interrupted => return self.finish_stopped(campaign),
                Attempt::Deleted => return Ok(self.finish_deleted(&campaign.id)),
            }

            if position < total && !self.state.is_stopping() {
                self.pace(&mut campaign, position, total, &mut rng).await?;
            }
        }

        campaign.set_status(CampaignStatus::Completed);
        if !self.campaigns.update(&campaign)? {
            return Ok(self.finish_deleted(&campaign.id));
        }
        let posted = campaign.count(OutcomeResult::Success);
        let failed = campaign.count(OutcomeResult::Failure);
        self.state.set_progress(
            format!("Completed: {posted} posted, {failed} failed of {total}"),
            true,
            true,
        );
        info!(campaign_id = %campaign.id, posted, failed, "campaign completed");
        Ok(RunEnd::Completed)
    }

    /// Wait out the pacing delay after post `position`. A stop or delete
    /// cuts the wait short; the next loop-entry check acts on it.
    async fn pace(&self, campaign: &mut Campaign, position: u32, total: u32, rng: &mut StdRng) -> Result<()> {
        let delay = pacing::delay_after(position, total, campaign.pacing.as_ref(), rng);
        if !delay.is_zero() {
            campaign.set_status(CampaignStatus::Waiting);
            if !self.campaigns.update(campaign)? {
                return Ok(());
            }
            self.state.set_progress(
                format!(
                    "Waiting {}s before next post ({position}/{total} done)",
                    delay.as_secs()
                ),
                true,
                false,
            );
            let state = self.state.clone();
            let campaigns = self.campaigns.clone();
            let id = campaign.id.clone();
            let outcome = pacing::wait_interruptible(delay, self.settings.pacing_poll, move || {
                state.is_stopping() || !campaigns.exists(&id).unwrap_or(true)
            })
            .await;
            if outcome == WaitOutcome::Interrupted {
                debug!(campaign_id = %campaign.id, "pacing wait interrupted");
                return Ok(());
            }
        }
        tokio::time::sleep(self.settings.inter_post_yield).await;
        Ok(())
    }

    /// Open a context, submit, close. The context is closed on every path.
    async fn attempt(
        &self,
        id: &CampaignId,
        dest: &Destination,
        text: String,
        attachments: Arc<[Attachment]>,
    ) -> Result<Attempt> {
        let lease = match self.acquire(dest).await {
            Ok(handle) => ContextLease {
                contexts: self.contexts.clone(),
                handle,
                closed: false,
            },
            Err(e) => return Ok(Attempt::Failed(e.to_string())),
        };
        let outcome = self.submit_in(&lease.handle, id, dest, text, attachments).await;
        lease.close().await;
        outcome
    }

    async fn submit_in(
        &self,
        handle: &ContextHandle,
        id: &CampaignId,
        dest: &Destination,
        text: String,
        attachments: Arc<[Attachment]>,
    ) -> Result<Attempt> {
        if self.state.is_stopping() {
            return Ok(Attempt::Interrupted);
        }
        if !self.campaigns.exists(id)? {
            return Ok(Attempt::Deleted);
        }

        let post = Post {
            destination_id: dest.id.clone(),
            text,
            attachments,
        };
        let signal = match self.submitter.submit(handle, &post).await {
            Ok(rx) => rx,
            Err(e) => return Ok(Attempt::Failed(e.to_string())),
        };

        Ok(match tokio::time::timeout(self.settings.submit_timeout, signal).await {
            Ok(Ok(SubmitSignal::Success)) => Attempt::Posted,
            Ok(Ok(SubmitSignal::Failure(reason))) => Attempt::Failed(reason),
            Ok(Err(_)) => Attempt::Failed("driver dropped the submit without a result".to_string()),
            Err(_) => Attempt::Failed(
                CampaignError::SubmissionTimeout {
                    destination: dest.id.clone(),
                    secs: self.settings.submit_timeout.as_secs(),
                }
                .to_string(),
            ),
        })
    }

    /// Open a destination context, retrying transient failures with
    /// exponential backoff.
    async fn acquire(&self, dest: &Destination) -> Result<ContextHandle> {
        let attempts = self.settings.acquire_attempts.max(1);
        let mut reason = String::new();

        for attempt in 0..attempts {
            match self.contexts.open(dest).await {
                Ok(handle) => return Ok(handle),
                Err(DriverError::Fatal(r)) => {
                    reason = r;
                    break;
                }
                Err(DriverError::Transient(r)) => {
                    reason = r;
                    if attempt + 1 < attempts {
                        let delay = self.settings.acquire_backoff_base * 2u32.saturating_pow(attempt);
                        warn!(
                            destination = %dest.id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "context open failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(CampaignError::TransientAcquisition {
            destination: dest.id.clone(),
            attempts,
            reason,
        })
    }

    fn load_attachments(&self, refs: &[String]) -> Result<Arc<[Attachment]>> {
        let mut out = Vec::with_capacity(refs.len());
        for id in refs {
            let (meta, bytes) = self
                .archive
                .read(id)?
                .ok_or_else(|| TransferError::NotFound(id.clone()))?;
            out.push(Attachment {
                id: meta.id,
                mime_type: meta.mime_type,
                bytes,
            });
        }
        Ok(out.into())
    }

    fn finish_stopped(&self, mut campaign: Campaign) -> Result<RunEnd> {
        let cancelled = campaign.record_remaining(OutcomeResult::Cancelled, "stopped");
        campaign.set_status(CampaignStatus::Stopped);
        if !self.campaigns.update(&campaign)? {
            return Ok(self.finish_deleted(&campaign.id));
        }
        let posted = campaign.count(OutcomeResult::Success);
        self.state.set_progress(
            format!("Stopped: {posted} posted, {cancelled} cancelled"),
            true,
            true,
        );
        info!(campaign_id = %campaign.id, posted, cancelled, "campaign stopped");
        Ok(RunEnd::Stopped)
    }

    /// Credits ran out mid-run: the rest of the list is never attempted.
    fn finish_exhausted(&self, mut campaign: Campaign, cause: &CampaignError) -> Result<RunEnd> {
        let skipped = campaign.record_remaining(OutcomeResult::Cancelled, &cause.to_string());
        campaign.set_status(CampaignStatus::Stopped);
        if !self.campaigns.update(&campaign)? {
            return Ok(self.finish_deleted(&campaign.id));
        }
        let posted = campaign.count(OutcomeResult::Success);
        self.state.set_progress(
            format!("Stopped: {posted} posted, {skipped} skipped ({cause})"),
            true,
            true,
        );
        warn!(campaign_id = %campaign.id, posted, skipped, reason = %cause, "campaign ended early");
        Ok(RunEnd::Exhausted)
    }

    fn finish_deleted(&self, id: &CampaignId) -> RunEnd {
        info!(campaign_id = %id, "campaign deleted mid-run, aborting");
        self.state.set_progress("Campaign deleted", true, true);
        RunEnd::Deleted
    }

    /// Mark every remaining destination failed and the campaign `Failed`.
    fn fail(&self, id: &CampaignId, reason: &str) {
        let result = self.campaigns.get(id).and_then(|found| match found {
            Some(mut c) => {
                c.record_remaining(OutcomeResult::Failure, reason);
                c.set_status(CampaignStatus::Failed);
                self.campaigns.update(&c).map(|_| ())
            }
            None => Ok(()),
        });
        if let Err(e) = result {
            error!(campaign_id = %id, error = %e, "could not record campaign failure");
        }
        self.state
            .set_progress(format!("Failed: {reason}"), true, true);
    }
}

fn display_name(dest: &Destination) -> &str {
    if dest.name.is_empty() {
        &dest.id
    } else {
        &dest.name
    }
}
