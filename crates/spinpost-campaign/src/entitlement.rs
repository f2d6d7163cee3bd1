//! Premium/credit gating.
//!
//! The remote service is the only source of truth. [`EntitlementGate`] keeps
//! the last answer for display, but every gating decision and every credit
//! decrement re-fetches first.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spinpost_core::EntitlementState;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{CampaignError, Result};

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Entitlement service unreachable: {0}")]
    Unreachable(String),

    #[error("Entitlement service rejected the request: {0}")]
    Rejected(String),
}

/// Server answer for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub premium: bool,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub credits: u32,
}

#[async_trait]
pub trait EntitlementService: Send + Sync {
    async fn fetch_subscription_status(
        &self,
        account_id: &str,
    ) -> std::result::Result<SubscriptionStatus, EntitlementError>;

    /// Decrement by one and return the new count.
    async fn consume_credit(&self, account_id: &str) -> std::result::Result<u32, EntitlementError>;
}

/// The single place entitlement is checked and credits are spent. Both direct
/// and scheduled campaigns go through it.
pub struct EntitlementGate {
    service: Arc<dyn EntitlementService>,
    account_id: String,
    cache: RwLock<Option<EntitlementState>>,
}

impl EntitlementGate {
    pub fn new(service: Arc<dyn EntitlementService>, account_id: impl Into<String>) -> Self {
        Self {
            service,
            account_id: account_id.into(),
            cache: RwLock::new(None),
        }
    }

    /// Fetch fresh status and refresh the display cache.
    pub async fn refresh(&self) -> Result<EntitlementState> {
        let status = self
            .service
            .fetch_subscription_status(&self.account_id)
            .await?;
        let state = EntitlementState {
            premium: status.premium,
            credits: status.credits,
            subscription_id: status.subscription_id,
            fetched_at: Utc::now(),
        };
        *self.cache.write().unwrap() = Some(state.clone());
        Ok(state)
    }

    /// Gate a campaign start, and any later attempt once the balance has
    /// hit zero. Fails with `EntitlementExhausted` when the server says the
    /// account is neither premium nor holding credits.
    pub async fn authorize_start(&self) -> Result<EntitlementState> {
        let state = self.refresh().await?;
        if !state.premium && state.credits == 0 {
            warn!(account_id = %self.account_id, "start blocked: no credits left");
            return Err(CampaignError::EntitlementExhausted);
        }
        Ok(state)
    }

    /// Spend one credit for a verified-successful submission.
    ///
    /// Premium status is re-read from the server; the cached flag is never
    /// consulted. Returns the new credit count, or `None` for premium
    /// accounts.
    pub async fn settle_success(&self) -> Result<Option<u32>> {
        let state = self.refresh().await?;
        if state.premium {
            return Ok(None);
        }
        let remaining = self.service.consume_credit(&self.account_id).await?;
        if let Some(cached) = self.cache.write().unwrap().as_mut() {
            cached.credits = remaining;
            cached.fetched_at = Utc::now();
        }
        info!(account_id = %self.account_id, remaining, "credit consumed");
        Ok(Some(remaining))
    }

    /// Last known state, for display only.
    pub fn cached(&self) -> Option<EntitlementState> {
        self.cache.read().unwrap().clone()
    }
}
