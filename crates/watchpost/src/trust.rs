//! Certificate trust decisions.
//!
//! The trust manager is a pure decision function over the approval store:
//! it never touches the network. An approval is sticky until the site
//! presents a different certificate, at which point the stale approval is
//! cleared and the user must decide again.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ports::ApprovalStore;

/// SHA-256 over the leaf certificate DER, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(hex::encode(digest))
    }

    /// Rehydrate a fingerprint persisted by an approval store.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is plenty for logs; full hex via as_hex().
        write!(f, "{}", &self.0[..self.0.len().min(16)])
    }
}

/// Outcome of consulting the trust manager for an untrusted certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Chain matches a previously approved fingerprint; retry silently.
    Accept,
    /// First time seen (or the certificate changed); needs a user decision.
    PromptRequired,
    /// Explicitly declined; treat the cycle as errored.
    Reject,
}

/// Holds per-site approval state behind the [`ApprovalStore`] port.
pub struct TrustManager {
    store: Arc<dyn ApprovalStore>,
    // Serialises approval reads/writes per site id; concurrent cycles for
    // different sites never contend with each other.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TrustManager {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store, locks: Mutex::new(HashMap::new()) }
    }

    /// Decide what to do with an untrusted certificate offered by a site.
    ///
    /// A stored approval that no longer matches the offered fingerprint is
    /// cleared here, so a changed certificate always goes back through the
    /// prompt instead of being silently accepted.
    pub async fn evaluate(&self, site_id: Uuid, offered: &Fingerprint) -> Result<TrustDecision> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;

        match self.store.get_approval(site_id).await? {
            Some(approved) if approved == *offered => Ok(TrustDecision::Accept),
            Some(stale) => {
                tracing::info!(
                    site_id = %site_id,
                    old = %stale,
                    new = %offered,
                    "certificate changed, clearing stale approval"
                );
                self.store.clear_approval(site_id).await?;
                Ok(TrustDecision::PromptRequired)
            }
            None => Ok(TrustDecision::PromptRequired),
        }
    }

    /// Record a user-approved fingerprint for a site.
    pub async fn approve(&self, site_id: Uuid, fingerprint: &Fingerprint) -> Result<()> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;
        self.store.set_approval(site_id, fingerprint).await
    }

    /// Drop any approval for a site.
    pub async fn revoke(&self, site_id: Uuid) -> Result<()> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;
        self.store.clear_approval(site_id).await
    }

    async fn site_lock(&self, site_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(site_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryApprovals {
        map: StdMutex<HashMap<Uuid, Fingerprint>>,
    }

    #[async_trait]
    impl ApprovalStore for MemoryApprovals {
        async fn get_approval(&self, site_id: Uuid) -> Result<Option<Fingerprint>> {
            Ok(self.map.lock().unwrap().get(&site_id).cloned())
        }

        async fn set_approval(&self, site_id: Uuid, fingerprint: &Fingerprint) -> Result<()> {
            self.map.lock().unwrap().insert(site_id, fingerprint.clone());
            Ok(())
        }

        async fn clear_approval(&self, site_id: Uuid) -> Result<()> {
            self.map.lock().unwrap().remove(&site_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unknown_site_requires_prompt() {
        let manager = TrustManager::new(Arc::new(MemoryApprovals::default()));
        let decision = manager
            .evaluate(Uuid::new_v4(), &Fingerprint::from_der(b"cert-a"))
            .await
            .unwrap();
        assert_eq!(decision, TrustDecision::PromptRequired);
    }

    #[tokio::test]
    async fn matching_approval_accepts_silently() {
        let manager = TrustManager::new(Arc::new(MemoryApprovals::default()));
        let site_id = Uuid::new_v4();
        let fp = Fingerprint::from_der(b"cert-a");

        manager.approve(site_id, &fp).await.unwrap();
        assert_eq!(manager.evaluate(site_id, &fp).await.unwrap(), TrustDecision::Accept);
    }

    #[tokio::test]
    async fn changed_fingerprint_invalidates_approval() {
        let store = Arc::new(MemoryApprovals::default());
        let manager = TrustManager::new(store.clone());
        let site_id = Uuid::new_v4();

        manager.approve(site_id, &Fingerprint::from_der(b"cert-a")).await.unwrap();

        let rotated = Fingerprint::from_der(b"cert-b");
        assert_eq!(
            manager.evaluate(site_id, &rotated).await.unwrap(),
            TrustDecision::PromptRequired
        );
        // The stale approval is gone: even the old certificate now prompts.
        assert_eq!(store.get_approval(site_id).await.unwrap(), None);
    }
}
