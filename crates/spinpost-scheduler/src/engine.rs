use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use spinpost_campaign::CampaignService;
use spinpost_core::config::SchedulerConfig;
use spinpost_core::{CampaignRequest, Frequency};
use spinpost_protocol::StartReply;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::schedule::due_occurrence;
use crate::store::ScheduleStore;

/// Whatever starts a campaign for a fired occurrence.
#[async_trait]
pub trait CampaignLauncher: Send + Sync {
    async fn launch(&self, schedule_id: &str, request: CampaignRequest) -> Result<StartReply>;
}

#[async_trait]
impl CampaignLauncher for CampaignService {
    async fn launch(&self, schedule_id: &str, request: CampaignRequest) -> Result<StartReply> {
        self.launch_scheduled(schedule_id, request)
            .await
            .map_err(|e| SchedulerError::Launch(e.to_string()))
    }
}

/// What one evaluation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Occurrence ids whose campaign was accepted.
    pub launched: Vec<String>,
    /// Occurrence ids consumed but refused (conflict, credits, launch error).
    pub rejected: Vec<String>,
}

/// Fixed-interval schedule evaluator.
pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    launcher: Arc<dyn CampaignLauncher>,
    tick_every: Duration,
    window: chrono::Duration,
    retention: chrono::Duration,
}

impl SchedulerEngine {
    pub fn new(store: Arc<ScheduleStore>, launcher: Arc<dyn CampaignLauncher>, cfg: &SchedulerConfig) -> Self {
        Self {
            store,
            launcher,
            tick_every: Duration::from_secs(cfg.tick_secs.max(1)),
            window: chrono::Duration::seconds(cfg.trigger_window_secs as i64),
            retention: chrono::Duration::days(cfg.ledger_retention_days.max(1)),
        }
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick_every.as_secs(), window_secs = self.window.num_seconds(), "scheduler engine started");
        if let Err(e) = self.store.ledger().prune_older_than(self.retention) {
            warn!(error = %e, "ledger pruning failed");
        }

        let mut interval = tokio::time::interval(self.tick_every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Local::now().naive_local()).await {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate every schedule against local wall-clock `now`.
    ///
    /// For each due occurrence the ledger entry is written first; only a
    /// fresh insert proceeds to launch. A rejected launch still consumes the
    /// occurrence.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<TickReport> {
        let mut report = TickReport::default();

        for schedule in self.store.list()? {
            let Some(occurrence) = due_occurrence(&schedule, now, self.window) else {
                continue;
            };
            // the cached list may be a few seconds stale
            if self.store.get(&schedule.id)?.is_none() {
                continue;
            }
            if !self
                .store
                .ledger()
                .record_once(&schedule.id, &occurrence.id)?
            {
                continue;
            }
            info!(
                schedule_id = %schedule.id,
                occurrence = %occurrence.id,
                fire_at = %occurrence.fire_at,
                "schedule triggered"
            );

            if schedule.frequency == Frequency::Once {
                self.store.mark_completed(&schedule.id)?;
            }

            match self
                .launcher
                .launch(&schedule.id, schedule.campaign.clone())
                .await
            {
                Ok(StartReply::Accepted { campaign_id }) => {
                    info!(schedule_id = %schedule.id, campaign_id = %campaign_id, "scheduled campaign started");
                    report.launched.push(occurrence.id);
                }
                Ok(StartReply::Rejected { reason }) => {
                    warn!(schedule_id = %schedule.id, occurrence = %occurrence.id, %reason, "scheduled campaign rejected");
                    report.rejected.push(occurrence.id);
                }
                Err(e) => {
                    error!(schedule_id = %schedule.id, occurrence = %occurrence.id, error = %e, "scheduled launch failed");
                    report.rejected.push(occurrence.id);
                }
            }
        }
        Ok(report)
    }
}
