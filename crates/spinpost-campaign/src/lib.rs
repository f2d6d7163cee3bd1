//! `spinpost-campaign` — the posting engine.
//!
//! A campaign posts one template to an ordered list of destinations. The
//! [`orchestrator::Orchestrator`] walks the list strictly in order: expand
//! the template with fresh [`spintax`] draws, open a destination context,
//! submit, close the context, then wait out the [`pacing`] delay. Run flags
//! and outcomes are written through the state store at every step so a
//! restart never finds a half-trusted "running" state.
//!
//! External collaborators are traits in [`driver`] and [`entitlement`].

pub mod driver;
pub mod entitlement;
pub mod error;
pub mod orchestrator;
pub mod pacing;
pub mod service;
pub mod spintax;

pub use driver::{Attachment, ContextHandle, ContextProvider, DriverError, Post, SubmitSignal, Submitter};
pub use entitlement::{EntitlementError, EntitlementGate, EntitlementService, SubscriptionStatus};
pub use error::{CampaignError, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use service::CampaignService;
