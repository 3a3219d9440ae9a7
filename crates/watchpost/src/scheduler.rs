//! Check scheduler: one timer-driven task per monitored site.
//!
//! Each site runs on its own tokio task, so a hung probe for one site
//! never delays the others. Within a task the cycle is awaited inline and
//! the interval timer skips missed ticks, which makes overlapping cycles
//! for the same site impossible and drops (never queues) ticks that fire
//! while a cycle is still running.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::ValidationExecutor;
use crate::model::Site;
use crate::ports::SiteStore;

pub struct CheckScheduler {
    executor: Arc<ValidationExecutor>,
    sites: Arc<dyn SiteStore>,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl CheckScheduler {
    pub fn new(executor: Arc<ValidationExecutor>, sites: Arc<dyn SiteStore>) -> Self {
        Self { executor, sites, tasks: Mutex::new(HashMap::new()) }
    }

    /// Seed timers for every monitored site. Returns how many were started.
    pub async fn start(&self) -> Result<usize> {
        let sites = self.sites.list_sites().await?;
        let count = sites.len();
        for site in sites {
            self.watch(&site);
        }
        info!(count, "scheduler started");
        Ok(count)
    }

    /// Start (or restart) the timer for one site. The first fire is one
    /// full interval from now; no immediate check is forced.
    pub fn watch(&self, site: &Site) {
        let site_id = site.id;
        let period = site.interval.as_duration();
        let executor = self.executor.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                match executor.run_cycle(site_id).await {
                    Ok(Some(result)) => {
                        debug!(site_id = %site_id, verdict = %result.verdict, "tick complete");
                    }
                    Ok(None) => {
                        debug!(site_id = %site_id, "site gone, retiring timer");
                        break;
                    }
                    Err(e) => {
                        warn!(site_id = %site_id, "cycle failed: {e:#}");
                    }
                }
            }
        });

        if let Some(previous) = self.tasks.lock().unwrap().insert(site_id, handle) {
            previous.abort();
        }
        debug!(site_id = %site_id, period_secs = period.as_secs(), "watching site");
    }

    /// Stop the timer for one site, cancelling any in-flight cycle. A
    /// cancelled cycle persists no status and emits no event.
    pub fn unwatch(&self, site_id: Uuid) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(&site_id) {
            handle.abort();
            debug!(site_id = %site_id, "stopped watching site");
        }
    }

    /// Apply a changed interval (or any other edit): restart the timer,
    /// with the next fire measured from this moment.
    pub fn update(&self, site: &Site) {
        self.watch(site);
    }

    pub fn is_watching(&self, site_id: Uuid) -> bool {
        self.tasks.lock().unwrap().contains_key(&site_id)
    }

    /// Cancel all timers and in-flight cycles.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        info!("scheduler stopped");
    }
}

impl Drop for CheckScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
