//! Seams to the automation agent that actually posts.
//!
//! [`ContextProvider`] opens and closes one isolated context per destination;
//! [`Submitter`] performs the submit inside it. The terminal result arrives
//! later on a oneshot channel; the caller bounds the wait.

use std::sync::Arc;

use async_trait::async_trait;
use spinpost_core::Destination;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Worth retrying (context not ready yet, agent busy).
    #[error("Transient driver failure: {0}")]
    Transient(String),

    #[error("Driver failure: {0}")]
    Fatal(String),
}

/// An opened destination context. Must be handed back to
/// [`ContextProvider::close`] on every path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextHandle {
    pub id: String,
    pub destination_id: String,
}

/// One binary attachment, shared by every post of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A fully expanded post for one destination.
#[derive(Debug, Clone)]
pub struct Post {
    pub destination_id: String,
    pub text: String,
    pub attachments: Arc<[Attachment]>,
}

/// Terminal signal for one submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitSignal {
    Success,
    Failure(String),
}

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn open(&self, destination: &Destination) -> Result<ContextHandle, DriverError>;

    async fn close(&self, handle: ContextHandle);
}

#[async_trait]
pub trait Submitter: Send + Sync {
    /// Start a submit. The returned receiver yields exactly one signal, or is
    /// dropped if the agent lost track of the submit.
    async fn submit(
        &self,
        handle: &ContextHandle,
        post: &Post,
    ) -> Result<oneshot::Receiver<SubmitSignal>, DriverError>;
}
