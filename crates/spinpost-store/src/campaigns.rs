use std::sync::Arc;

use spinpost_core::{Campaign, CampaignId, CampaignStatus, OutcomeResult};
use tracing::{info, warn};

use crate::collections::CAMPAIGNS;
use crate::error::{Result, StoreError};
use crate::repo::{Repository, RepositoryExt};

/// Campaign records, written through after every transition.
#[derive(Clone)]
pub struct CampaignStore {
    repo: Arc<dyn Repository>,
}

impl CampaignStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn get(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        self.repo.get_json(CAMPAIGNS, id.as_str())
    }

    pub fn exists(&self, id: &CampaignId) -> Result<bool> {
        Ok(self.repo.value_len(CAMPAIGNS, id.as_str())?.is_some())
    }

    pub fn put(&self, campaign: &Campaign) -> Result<()> {
        self.repo
            .put_json(CAMPAIGNS, campaign.id.as_str(), campaign)
    }

    /// Overwrite an existing record. Returns `false` without writing when the
    /// record was deleted in the meantime; check and write are one step.
    pub fn update(&self, campaign: &Campaign) -> Result<bool> {
        self.repo
            .replace_json(CAMPAIGNS, campaign.id.as_str(), campaign)
    }

    /// Returns `NotFound` when there was nothing to delete.
    pub fn delete(&self, id: &CampaignId) -> Result<()> {
        if !self.repo.delete(CAMPAIGNS, id.as_str())? {
            return Err(StoreError::NotFound {
                collection: CAMPAIGNS.to_string(),
                key: id.to_string(),
            });
        }
        info!(campaign_id = %id, "campaign deleted");
        Ok(())
    }

    /// All campaigns, oldest first.
    pub fn list(&self) -> Result<Vec<Campaign>> {
        let mut all: Vec<Campaign> = self.repo.list_json(CAMPAIGNS)?;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    /// Delete every campaign launched from `schedule_id`. Returns the count.
    pub fn delete_by_schedule(&self, schedule_id: &str) -> Result<usize> {
        let mut removed = 0;
        for c in self.list()? {
            if c.schedule_id.as_deref() == Some(schedule_id)
                && self.repo.delete(CAMPAIGNS, c.id.as_str())?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Close out campaigns a previous process left mid-run.
    ///
    /// Called once at cold start, after the run flags were reset. Any record
    /// still in an active state is marked `Stopped` with its unattempted
    /// destinations recorded as `cancelled`.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut c in self.list()? {
            if !c.status.is_active() {
                continue;
            }
            let cancelled = c.record_remaining(OutcomeResult::Cancelled, "interrupted by restart");
            c.set_status(CampaignStatus::Stopped);
            self.put(&c)?;
            warn!(campaign_id = %c.id, cancelled, "recovered campaign interrupted by restart");
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use spinpost_core::{CampaignRequest, Destination};

    fn request() -> CampaignRequest {
        CampaignRequest {
            destinations: vec![Destination::new("g1"), Destination::new("g2")],
            template: "hello".to_string(),
            media_refs: Vec::new(),
            pacing: None,
        }
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = CampaignStore::new(Arc::new(MemoryRepository::new()));
        assert!(matches!(
            store.delete(&CampaignId::from("nope")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_by_schedule_removes_only_matching() {
        let store = CampaignStore::new(Arc::new(MemoryRepository::new()));
        let a = Campaign::from_request(request(), Some("s1".to_string()));
        let b = Campaign::from_request(request(), None);
        store.put(&a).unwrap();
        store.put(&b).unwrap();
        assert_eq!(store.delete_by_schedule("s1").unwrap(), 1);
        assert!(!store.exists(&a.id).unwrap());
        assert!(store.exists(&b.id).unwrap());
    }

    #[test]
    fn recover_interrupted_cancels_remaining() {
        let store = CampaignStore::new(Arc::new(MemoryRepository::new()));
        let mut c = Campaign::from_request(request(), None);
        c.record("g1", OutcomeResult::Success, None);
        c.set_status(CampaignStatus::Waiting);
        store.put(&c).unwrap();

        assert_eq!(store.recover_interrupted().unwrap(), 1);
        let c = store.get(&c.id).unwrap().unwrap();
        assert_eq!(c.status, CampaignStatus::Stopped);
        assert_eq!(c.outcomes.len(), 2);
        assert_eq!(c.outcomes[1].result, OutcomeResult::Cancelled);
    }

    #[test]
    fn update_does_not_resurrect_deleted_record() {
        let repos: Vec<Arc<dyn Repository>> = vec![
            Arc::new(MemoryRepository::new()),
            Arc::new(crate::repo::SqliteRepository::open_in_memory().unwrap()),
        ];
        for repo in repos {
            let store = CampaignStore::new(repo);
            let mut c = Campaign::from_request(request(), None);
            store.put(&c).unwrap();

            c.set_status(CampaignStatus::Starting);
            assert!(store.update(&c).unwrap());
            assert_eq!(store.get(&c.id).unwrap().unwrap().status, CampaignStatus::Starting);

            store.delete(&c.id).unwrap();
            c.set_status(CampaignStatus::Posting);
            assert!(!store.update(&c).unwrap());
            assert!(!store.exists(&c.id).unwrap());
        }
    }
}
