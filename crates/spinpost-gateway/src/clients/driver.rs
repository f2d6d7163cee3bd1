use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spinpost_campaign::{ContextHandle, ContextProvider, DriverError, Post, SubmitSignal, Submitter};
use spinpost_core::config::DriverConfig;
use spinpost_core::Destination;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Automation agent reached over HTTP.
///
/// Attachments are announced by id only; the agent pulls the bytes over the
/// `/ws/media` download channel.
#[derive(Clone)]
pub struct HttpDriver {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OpenRequest<'a> {
    destination_id: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct OpenResponse {
    id: String,
}

#[derive(Serialize)]
struct AttachmentRef<'a> {
    id: &'a str,
    mime_type: &'a str,
    size: usize,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    text: &'a str,
    attachments: Vec<AttachmentRef<'a>>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    submit_id: String,
}

#[derive(Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum SubmitState {
    Pending,
    Success,
    Failure {
        #[serde(default)]
        reason: String,
    },
}

impl HttpDriver {
    pub fn new(cfg: &DriverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Busy agents and unready contexts are worth retrying; anything else
    /// the agent rejected is not.
    async fn classify(resp: reqwest::Response) -> Result<reqwest::Response, DriverError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let msg = format!("{}: {text}", status.as_u16());
        if status.as_u16() == 409 || status.as_u16() == 429 || status.is_server_error() {
            Err(DriverError::Transient(msg))
        } else {
            Err(DriverError::Fatal(msg))
        }
    }
}

fn transport(e: reqwest::Error) -> DriverError {
    if e.is_connect() || e.is_timeout() {
        DriverError::Transient(e.to_string())
    } else {
        DriverError::Fatal(e.to_string())
    }
}

#[async_trait]
impl ContextProvider for HttpDriver {
    async fn open(&self, destination: &Destination) -> Result<ContextHandle, DriverError> {
        let url = format!("{}/contexts", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&OpenRequest {
                destination_id: &destination.id,
                name: &destination.name,
            })
            .send()
            .await
            .map_err(transport)?;
        let body: OpenResponse = Self::classify(resp)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Fatal(format!("bad open response: {e}")))?;
        debug!(context_id = %body.id, destination = %destination.id, "context opened");
        Ok(ContextHandle {
            id: body.id,
            destination_id: destination.id.clone(),
        })
    }

    async fn close(&self, handle: ContextHandle) {
        let url = format!("{}/contexts/{}", self.base_url, handle.id);
        match self.client.delete(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(context_id = %handle.id, "context closed");
            }
            Ok(resp) => warn!(context_id = %handle.id, status = resp.status().as_u16(), "context close rejected"),
            Err(e) => warn!(context_id = %handle.id, error = %e, "context close failed"),
        }
    }
}

#[async_trait]
impl Submitter for HttpDriver {
    async fn submit(
        &self,
        handle: &ContextHandle,
        post: &Post,
    ) -> Result<oneshot::Receiver<SubmitSignal>, DriverError> {
        let url = format!("{}/contexts/{}/submit", self.base_url, handle.id);
        let body = SubmitRequest {
            text: &post.text,
            attachments: post
                .attachments
                .iter()
                .map(|a| AttachmentRef {
                    id: &a.id,
                    mime_type: &a.mime_type,
                    size: a.bytes.len(),
                })
                .collect(),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let accepted: SubmitResponse = Self::classify(resp)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Fatal(format!("bad submit response: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let driver = self.clone();
        tokio::spawn(async move {
            driver.poll_until_terminal(accepted.submit_id, tx).await;
        });
        Ok(rx)
    }
}

impl HttpDriver {
    /// Poll the submit until it reaches a terminal state, or until the
    /// orchestrator stops waiting (receiver dropped).
    async fn poll_until_terminal(&self, submit_id: String, tx: oneshot::Sender<SubmitSignal>) {
        let url = format!("{}/submits/{submit_id}", self.base_url);
        loop {
            if tx.is_closed() {
                debug!(%submit_id, "submit no longer awaited");
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let state = match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => resp.json::<SubmitState>().await,
                Ok(resp) => {
                    warn!(%submit_id, status = resp.status().as_u16(), "submit poll rejected");
                    continue;
                }
                Err(e) => {
                    warn!(%submit_id, error = %e, "submit poll failed");
                    continue;
                }
            };
            let signal = match state {
                Ok(SubmitState::Pending) => continue,
                Ok(SubmitState::Success) => SubmitSignal::Success,
                Ok(SubmitState::Failure { reason }) => SubmitSignal::Failure(reason),
                Err(e) => {
                    warn!(%submit_id, error = %e, "unreadable submit state");
                    continue;
                }
            };
            let _ = tx.send(signal);
            return;
        }
    }
}
