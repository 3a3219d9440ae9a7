//! Service-wide event bus and the notifier wired into the engine.
//!
//! Status changes are always published on the bus for in-process consumers
//! (the trust prompt flow rides the same bus). A user-facing notification
//! line is only logged while the app is backgrounded; a foregrounded UI is
//! expected to render the change itself.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;
use watchpost::{Notifier, StatusChangeEvent, Verdict};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(StatusChangeEvent),
    TrustRequested {
        request_id: Uuid,
        site_id: Uuid,
        fingerprint: String,
    },
}

static BUS_TX: OnceLock<broadcast::Sender<EngineEvent>> = OnceLock::new();

fn bus() -> &'static broadcast::Sender<EngineEvent> {
    BUS_TX.get_or_init(|| {
        let (tx, _rx) = broadcast::channel::<EngineEvent>(64);
        tx
    })
}

pub fn subscribe() -> broadcast::Receiver<EngineEvent> {
    bus().subscribe()
}

pub fn publish(event: EngineEvent) {
    // Ignore errors if there are no receivers
    let _ = bus().send(event);
}

static FOREGROUND: AtomicBool = AtomicBool::new(false);

/// Tell the notifier whether a UI is currently in the foreground.
pub fn set_app_foreground(foreground: bool) {
    FOREGROUND.store(foreground, Ordering::Relaxed);
}

fn is_app_foreground() -> bool {
    FOREGROUND.load(Ordering::Relaxed)
}

/// Engine notifier backed by the bus.
pub struct BusNotifier;

#[async_trait]
impl Notifier for BusNotifier {
    async fn on_status_change(&self, event: &StatusChangeEvent) -> Result<()> {
        publish(EngineEvent::StatusChanged(event.clone()));

        if !is_app_foreground() {
            let payload = serde_json::to_string(event)?;
            match event.current {
                Verdict::Ok => {
                    info!(target: "notification", %payload, "site is up");
                }
                Verdict::Failed => {
                    warn!(target: "notification", %payload, "site validation failed");
                }
                Verdict::Errored => {
                    warn!(target: "notification", %payload, "site check errored");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn status_changes_reach_bus_subscribers() {
        let mut rx = subscribe();

        let event = StatusChangeEvent {
            site_id: Uuid::new_v4(),
            previous: Some(Verdict::Ok),
            current: Verdict::Failed,
            reason: "term not found".into(),
            at: Utc::now(),
        };
        BusNotifier.on_status_change(&event).await.unwrap();

        // The bus is shared across tests, so skip unrelated traffic.
        loop {
            match rx.recv().await.unwrap() {
                EngineEvent::StatusChanged(received) if received.site_id == event.site_id => {
                    assert_eq!(received.current, Verdict::Failed);
                    break;
                }
                _ => continue,
            }
        }
    }
}
