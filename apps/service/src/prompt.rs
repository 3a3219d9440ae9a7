//! Certificate trust prompts over the event bus.
//!
//! The engine asks for a decision and waits; we publish a `TrustRequested`
//! event and park the cycle on a oneshot until some UI (or an operator
//! command) calls [`BusPrompt::answer`]. The engine bounds the wait with
//! its own prompt timeout, so an abandoned request simply expires there.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;
use watchpost::{Fingerprint, PromptAnswer, TrustPrompt};

use crate::notify::{self, EngineEvent};

#[derive(Default)]
pub struct BusPrompt {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<PromptAnswer>>>,
}

impl BusPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an outstanding trust request. Returns false when the
    /// request is unknown or the asking cycle already timed out.
    pub fn answer(&self, request_id: Uuid, answer: PromptAnswer) -> bool {
        let Some(tx) = self.pending.lock().unwrap().remove(&request_id) else {
            debug!(%request_id, "trust answer for unknown request");
            return false;
        };
        tx.send(answer).is_ok()
    }
}

#[async_trait]
impl TrustPrompt for BusPrompt {
    async fn request_trust_decision(
        &self,
        site_id: Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<PromptAnswer> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);

        notify::publish(EngineEvent::TrustRequested {
            request_id,
            site_id,
            fingerprint: fingerprint.as_hex().to_string(),
        });
        debug!(%request_id, %site_id, "trust decision requested");

        match rx.await {
            Ok(answer) => Ok(answer),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                bail!("trust prompt dropped without an answer")
            }
        }
    }
}
