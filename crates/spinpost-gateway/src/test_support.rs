//! In-memory `AppState` for handler tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spinpost_campaign::{
    CampaignService, ContextHandle, ContextProvider, DriverError, EntitlementError,
    EntitlementGate, EntitlementService, Orchestrator, OrchestratorSettings, Post, SubmitSignal,
    Submitter, SubscriptionStatus,
};
use spinpost_core::config::SpinpostConfig;
use spinpost_core::Destination;
use spinpost_scheduler::ScheduleStore;
use spinpost_store::{CampaignStore, MemoryRepository, Repository, StateStore};
use spinpost_transfer::MediaArchive;
use tokio::sync::oneshot;

use crate::app::AppState;

struct InstantDriver;

#[async_trait]
impl ContextProvider for InstantDriver {
    async fn open(&self, destination: &Destination) -> Result<ContextHandle, DriverError> {
        Ok(ContextHandle {
            id: format!("ctx-{}", destination.id),
            destination_id: destination.id.clone(),
        })
    }

    async fn close(&self, _handle: ContextHandle) {}
}

#[async_trait]
impl Submitter for InstantDriver {
    async fn submit(
        &self,
        _handle: &ContextHandle,
        _post: &Post,
    ) -> Result<oneshot::Receiver<SubmitSignal>, DriverError> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(SubmitSignal::Success);
        Ok(rx)
    }
}

struct PremiumAccount;

#[async_trait]
impl EntitlementService for PremiumAccount {
    async fn fetch_subscription_status(
        &self,
        _account_id: &str,
    ) -> Result<SubscriptionStatus, EntitlementError> {
        Ok(SubscriptionStatus {
            premium: true,
            subscription_id: Some("sub-test".into()),
            credits: 0,
        })
    }

    async fn consume_credit(&self, _account_id: &str) -> Result<u32, EntitlementError> {
        Ok(0)
    }
}

pub fn test_state() -> Arc<AppState> {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let state = Arc::new(StateStore::hydrate(repo.clone()));
    let archive = MediaArchive::new(repo.clone());
    let driver = Arc::new(InstantDriver);
    let orchestrator = Arc::new(Orchestrator::new(
        state.clone(),
        CampaignStore::new(repo.clone()),
        archive.clone(),
        driver.clone(),
        driver,
        Arc::new(EntitlementGate::new(Arc::new(PremiumAccount), "acct-test")),
        OrchestratorSettings::default(),
    ));
    let schedules = Arc::new(ScheduleStore::new(repo, Duration::ZERO));
    Arc::new(AppState::new(
        SpinpostConfig::default(),
        false,
        state,
        CampaignService::new(orchestrator),
        schedules,
        archive,
    ))
}
