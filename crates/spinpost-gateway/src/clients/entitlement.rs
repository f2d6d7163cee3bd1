use async_trait::async_trait;
use serde::Deserialize;
use spinpost_campaign::{EntitlementError, EntitlementService, SubscriptionStatus};
use spinpost_core::config::EntitlementConfig;
use tracing::{debug, warn};

/// Remote entitlement service over HTTP.
///
/// `GET  {base}/accounts/{id}/subscription`    → `{premium, subscriptionId, credits}`
/// `POST {base}/accounts/{id}/credits/consume` → `{credits}`
pub struct HttpEntitlementService {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct ConsumeResponse {
    credits: u32,
}

impl HttpEntitlementService {
    pub fn new(cfg: &EntitlementConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_token: cfg.api_token.clone(),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EntitlementError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "entitlement service error");
        Err(EntitlementError::Rejected(format!("{status}: {text}")))
    }
}

fn unreachable(e: reqwest::Error) -> EntitlementError {
    EntitlementError::Unreachable(e.to_string())
}

#[async_trait]
impl EntitlementService for HttpEntitlementService {
    async fn fetch_subscription_status(&self, account_id: &str) -> Result<SubscriptionStatus, EntitlementError> {
        let url = format!("{}/accounts/{account_id}/subscription", self.base_url);
        debug!(%url, "fetching subscription status");
        let resp = self
            .apply_auth(self.client.get(&url))
            .send()
            .await
            .map_err(unreachable)?;
        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| EntitlementError::Rejected(format!("bad response: {e}")))
    }

    async fn consume_credit(&self, account_id: &str) -> Result<u32, EntitlementError> {
        let url = format!("{}/accounts/{account_id}/credits/consume", self.base_url);
        let resp = self
            .apply_auth(self.client.post(&url))
            .send()
            .await
            .map_err(unreachable)?;
        let body: ConsumeResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| EntitlementError::Rejected(format!("bad response: {e}")))?;
        Ok(body.credits)
    }
}
