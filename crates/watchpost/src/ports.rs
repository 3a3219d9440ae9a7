//! Collaborator ports.
//!
//! Everything the engine does not own — persistence, certificate approval
//! storage, the user trust prompt, and notification delivery — sits behind
//! these traits. The service binary provides the real implementations; the
//! engine tests use in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Site, SiteStatus, StatusChangeEvent};
use crate::trust::Fingerprint;

/// Persistence for monitored sites. The engine only ever reads snapshots
/// and writes back a status; it never creates or deletes sites.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Fetch the current snapshot of one site, or `None` if it was removed.
    async fn load_site(&self, id: Uuid) -> Result<Option<Site>>;

    /// Write the outcome of a check cycle back onto the site.
    async fn save_status(&self, id: Uuid, status: &SiteStatus) -> Result<()>;

    /// All monitored sites, consulted at scheduler startup.
    async fn list_sites(&self) -> Result<Vec<Site>>;
}

/// Persistence for user-approved certificate fingerprints, keyed by site.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn get_approval(&self, site_id: Uuid) -> Result<Option<Fingerprint>>;

    async fn set_approval(&self, site_id: Uuid, fingerprint: &Fingerprint) -> Result<()>;

    async fn clear_approval(&self, site_id: Uuid) -> Result<()>;
}

/// The user's answer to a certificate trust prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Accepted,
    Rejected,
}

/// Surfaces a trust decision request to the user.
///
/// The engine wraps the call in its own prompt timeout and treats no
/// answer as a rejection, so implementations may block indefinitely.
#[async_trait]
pub trait TrustPrompt: Send + Sync {
    async fn request_trust_decision(
        &self,
        site_id: Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<PromptAnswer>;
}

/// Receives status-change events. The engine emits on every verdict
/// transition; whether and how an event is surfaced (system notification,
/// silent in-app indicator) is entirely the notifier's policy.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_status_change(&self, event: &StatusChangeEvent) -> Result<()>;
}
