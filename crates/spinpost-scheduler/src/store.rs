use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spinpost_core::{Schedule, ScheduleDraft};
use spinpost_store::collections::SCHEDULES;
use spinpost_store::{CampaignStore, Repository, RepositoryExt, TriggeredLedger};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::validate_draft;

/// Stored schedules behind a short-TTL read cache.
///
/// The engine reads on every tick; writes go straight to the repository and
/// invalidate the cache.
pub struct ScheduleStore {
    repo: Arc<dyn Repository>,
    campaigns: CampaignStore,
    ledger: TriggeredLedger,
    cache: Mutex<Option<(Instant, Vec<Schedule>)>>,
    ttl: Duration,
}

impl ScheduleStore {
    pub fn new(repo: Arc<dyn Repository>, ttl: Duration) -> Self {
        Self {
            campaigns: CampaignStore::new(repo.clone()),
            ledger: TriggeredLedger::new(repo.clone()),
            repo,
            cache: Mutex::new(None),
            ttl,
        }
    }

    pub fn ledger(&self) -> &TriggeredLedger {
        &self.ledger
    }

    pub fn add(&self, draft: ScheduleDraft) -> Result<Schedule> {
        validate_draft(&draft)?;
        let schedule = Schedule::from_draft(Uuid::new_v4().to_string(), draft);
        self.repo.put_json(SCHEDULES, &schedule.id, &schedule)?;
        self.invalidate();
        info!(schedule_id = %schedule.id, name = %schedule.name, frequency = ?schedule.frequency, "schedule added");
        Ok(schedule)
    }

    pub fn get(&self, id: &str) -> Result<Option<Schedule>> {
        Ok(self.repo.get_json(SCHEDULES, id)?)
    }

    /// All schedules, oldest first. Served from cache while it is fresh.
    pub fn list(&self) -> Result<Vec<Schedule>> {
        if let Some((at, cached)) = self.cache.lock().unwrap().as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(cached.clone());
            }
        }
        let mut all: Vec<Schedule> = self.repo.list_json(SCHEDULES)?;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        *self.cache.lock().unwrap() = Some((Instant::now(), all.clone()));
        debug!(count = all.len(), "schedules loaded");
        Ok(all)
    }

    /// Flag a one-shot schedule as done. Returns `false` if it was deleted.
    pub fn mark_completed(&self, id: &str) -> Result<bool> {
        let Some(mut schedule) = self.get(id)? else {
            return Ok(false);
        };
        schedule.completed = true;
        self.repo.put_json(SCHEDULES, id, &schedule)?;
        self.invalidate();
        Ok(true)
    }

    /// Delete a schedule together with the campaigns it launched and its
    /// ledger entries.
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.repo.delete(SCHEDULES, id)? {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        self.invalidate();
        let campaigns = self.campaigns.delete_by_schedule(id)?;
        let occurrences = self.ledger.forget_schedule(id)?;
        info!(schedule_id = %id, campaigns, occurrences, "schedule deleted");
        Ok(())
    }

    fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }
}
