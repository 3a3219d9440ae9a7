//! Validation executor: the engine's single public entry point.
//!
//! One call runs one end-to-end cycle for one site: fetch the snapshot,
//! probe, resolve certificate trust if needed, evaluate the rule,
//! reconcile the status and forward any change event. No failure of the
//! probe/trust/rule path escapes as an error; every such path terminates
//! in a `ValidationResult`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Site, ValidationResult};
use crate::ports::{Notifier, PromptAnswer, SiteStore, TrustPrompt};
use crate::probe::{
    HttpProber, ProbeFailure, ProbeOutcome, Prober, DEFAULT_BODY_CAP, DEFAULT_REDIRECT_CAP,
};
use crate::reconcile::reconcile;
use crate::rules::RuleEvaluator;
use crate::trust::{TrustDecision, TrustManager};

/// Engine tuning constants. The defaults are deliberate and every one of
/// them is overridable by the host.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on the whole probe exchange.
    pub probe_timeout: Duration,
    /// Bound on how much response body is read.
    pub body_cap: usize,
    /// Redirect depth bound for probes.
    pub redirect_cap: usize,
    /// Time budget for one script evaluation.
    pub script_budget: Duration,
    /// How long a certificate prompt may stay unanswered before the cycle
    /// resolves as rejected.
    pub prompt_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            body_cap: DEFAULT_BODY_CAP,
            redirect_cap: DEFAULT_REDIRECT_CAP,
            script_budget: Duration::from_secs(5),
            prompt_timeout: Duration::from_secs(60),
        }
    }
}

/// Composes prober, trust manager, rule evaluator and the collaborator
/// ports into one engine. Built once at process start via
/// [`EngineBuilder`]; all references are explicit.
pub struct ValidationExecutor {
    prober: Arc<dyn Prober>,
    trust: TrustManager,
    rules: RuleEvaluator,
    sites: Arc<dyn SiteStore>,
    prompt: Arc<dyn TrustPrompt>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl ValidationExecutor {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Run one check cycle for a site.
    ///
    /// Returns `Ok(None)` when the site no longer exists (the scheduler
    /// uses this to retire the timer). `Err` is reserved for collaborator
    /// failures outside the cycle contract, e.g. the site store going
    /// away; probe and validation failures all resolve to a result.
    pub async fn run_cycle(&self, site_id: Uuid) -> Result<Option<ValidationResult>> {
        let Some(site) = self.sites.load_site(site_id).await? else {
            debug!(site_id = %site_id, "site removed, skipping cycle");
            return Ok(None);
        };

        let outcome = self.probe_with_trust(&site).await;
        let result = self.rules.evaluate(&outcome, &site.rule).await;
        debug!(site = %site.name, verdict = %result.verdict, reason = %result.reason, "cycle complete");

        let (status, event) = reconcile(&site, &result);
        self.sites.save_status(site.id, &status).await?;

        if let Some(event) = event {
            info!(
                site = %site.name,
                previous = ?event.previous,
                current = %event.current,
                "status changed"
            );
            if let Err(e) = self.notifier.on_status_change(&event).await {
                warn!(site = %site.name, "notifier failed: {e:#}");
            }
        }

        Ok(Some(result))
    }

    /// Probe the site, resolving certificate trust along the way. At most
    /// one retry (with a trust override) happens per cycle.
    async fn probe_with_trust(&self, site: &Site) -> ProbeOutcome {
        let outcome = self
            .prober
            .probe(&site.url, self.config.probe_timeout, None)
            .await;

        let fingerprint = match &outcome {
            Err(ProbeFailure::UntrustedCertificate { fingerprint }) => fingerprint.clone(),
            _ => return outcome,
        };

        let decision = match self.trust.evaluate(site.id, &fingerprint).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(site = %site.name, "approval store failed: {e:#}");
                return outcome;
            }
        };

        match decision {
            TrustDecision::Accept => {
                debug!(site = %site.name, fingerprint = %fingerprint, "certificate previously approved, retrying");
                self.prober
                    .probe(&site.url, self.config.probe_timeout, Some(&fingerprint))
                    .await
            }
            TrustDecision::PromptRequired => {
                // Bounded wait; no answer counts as a rejection so the
                // cycle always has a terminal outcome.
                let answer = tokio::time::timeout(
                    self.config.prompt_timeout,
                    self.prompt.request_trust_decision(site.id, &fingerprint),
                )
                .await;

                match answer {
                    Ok(Ok(PromptAnswer::Accepted)) => {
                        if let Err(e) = self.trust.approve(site.id, &fingerprint).await {
                            warn!(site = %site.name, "failed to persist approval: {e:#}");
                        }
                        self.prober
                            .probe(&site.url, self.config.probe_timeout, Some(&fingerprint))
                            .await
                    }
                    Ok(Ok(PromptAnswer::Rejected)) => {
                        Err(ProbeFailure::UntrustedCertificate { fingerprint })
                    }
                    Ok(Err(e)) => {
                        warn!(site = %site.name, "trust prompt failed: {e:#}");
                        Err(ProbeFailure::UntrustedCertificate { fingerprint })
                    }
                    Err(_elapsed) => {
                        info!(site = %site.name, "trust prompt timed out, treating as rejected");
                        Err(ProbeFailure::UntrustedCertificate { fingerprint })
                    }
                }
            }
            TrustDecision::Reject => Err(ProbeFailure::UntrustedCertificate { fingerprint }),
        }
    }
}

/// Explicit construction of the engine; no ambient wiring.
#[derive(Default)]
pub struct EngineBuilder {
    prober: Option<Arc<dyn Prober>>,
    sites: Option<Arc<dyn SiteStore>>,
    approvals: Option<Arc<dyn crate::ports::ApprovalStore>>,
    prompt: Option<Arc<dyn TrustPrompt>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: Option<EngineConfig>,
}

impl EngineBuilder {
    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn site_store(mut self, sites: Arc<dyn SiteStore>) -> Self {
        self.sites = Some(sites);
        self
    }

    pub fn approval_store(mut self, approvals: Arc<dyn crate::ports::ApprovalStore>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn trust_prompt(mut self, prompt: Arc<dyn TrustPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ValidationExecutor> {
        let config = self.config.unwrap_or_default();
        let prober = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProber::new(config.body_cap, config.redirect_cap)?),
        };
        let sites = self.sites.ok_or_else(|| anyhow::anyhow!("site store is required"))?;
        let approvals = self
            .approvals
            .ok_or_else(|| anyhow::anyhow!("approval store is required"))?;
        let prompt = self.prompt.ok_or_else(|| anyhow::anyhow!("trust prompt is required"))?;
        let notifier = self.notifier.ok_or_else(|| anyhow::anyhow!("notifier is required"))?;

        Ok(ValidationExecutor {
            prober,
            trust: TrustManager::new(approvals),
            rules: RuleEvaluator::new(config.script_budget),
            sites,
            prompt,
            notifier,
            config,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{CheckInterval, SiteStatus, StatusChangeEvent, ValidationRule, Verdict};
    use crate::probe::ProbeResponse;
    use crate::trust::Fingerprint;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub sites: Mutex<HashMap<Uuid, Site>>,
        pub saved: Mutex<Vec<(Uuid, SiteStatus)>>,
        pub approvals: Mutex<HashMap<Uuid, Fingerprint>>,
    }

    impl FakeStore {
        pub fn with_site(site: Site) -> Arc<Self> {
            let store = Self::default();
            store.sites.lock().unwrap().insert(site.id, site);
            Arc::new(store)
        }
    }

    #[async_trait]
    impl SiteStore for FakeStore {
        async fn load_site(&self, id: Uuid) -> Result<Option<Site>> {
            Ok(self.sites.lock().unwrap().get(&id).cloned())
        }

        async fn save_status(&self, id: Uuid, status: &SiteStatus) -> Result<()> {
            self.saved.lock().unwrap().push((id, status.clone()));
            if let Some(site) = self.sites.lock().unwrap().get_mut(&id) {
                site.last_status = Some(status.clone());
            }
            Ok(())
        }

        async fn list_sites(&self) -> Result<Vec<Site>> {
            Ok(self.sites.lock().unwrap().values().cloned().collect())
        }
    }

    #[async_trait]
    impl crate::ports::ApprovalStore for FakeStore {
        async fn get_approval(&self, site_id: Uuid) -> Result<Option<Fingerprint>> {
            Ok(self.approvals.lock().unwrap().get(&site_id).cloned())
        }

        async fn set_approval(&self, site_id: Uuid, fingerprint: &Fingerprint) -> Result<()> {
            self.approvals.lock().unwrap().insert(site_id, fingerprint.clone());
            Ok(())
        }

        async fn clear_approval(&self, site_id: Uuid) -> Result<()> {
            self.approvals.lock().unwrap().remove(&site_id);
            Ok(())
        }
    }

    /// Serves a scripted queue of outcomes; repeats the last one forever.
    pub(crate) struct FakeProber {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
        pub calls: AtomicUsize,
        pub override_calls: AtomicUsize,
    }

    impl FakeProber {
        pub fn scripted(outcomes: Vec<ProbeOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                override_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(
            &self,
            _url: &str,
            _timeout: Duration,
            trust_override: Option<&Fingerprint>,
        ) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if trust_override.is_some() {
                self.override_calls.fetch_add(1, Ordering::SeqCst);
            }
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap_or(Err(ProbeFailure::Timeout))
            }
        }
    }

    pub(crate) enum PromptBehavior {
        Answer(PromptAnswer),
        NeverAnswers,
    }

    pub(crate) struct FakePrompt {
        behavior: PromptBehavior,
        pub requests: AtomicUsize,
    }

    impl FakePrompt {
        pub fn answering(answer: PromptAnswer) -> Arc<Self> {
            Arc::new(Self { behavior: PromptBehavior::Answer(answer), requests: AtomicUsize::new(0) })
        }

        pub fn silent() -> Arc<Self> {
            Arc::new(Self { behavior: PromptBehavior::NeverAnswers, requests: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl TrustPrompt for FakePrompt {
        async fn request_trust_decision(
            &self,
            _site_id: Uuid,
            _fingerprint: &Fingerprint,
        ) -> Result<PromptAnswer> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                PromptBehavior::Answer(answer) => Ok(*answer),
                PromptBehavior::NeverAnswers => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeNotifier {
        pub events: Mutex<Vec<StatusChangeEvent>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn on_status_change(&self, event: &StatusChangeEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    pub(crate) fn ok_response() -> ProbeOutcome {
        Ok(ProbeResponse {
            status: 200,
            headers: vec![],
            body: "system healthy".into(),
            body_truncated: false,
            fingerprint: None,
            elapsed_ms: 5,
        })
    }

    pub(crate) fn test_site() -> Site {
        Site::new(
            "example",
            "https://example.com",
            CheckInterval::clamped(Duration::from_secs(60)),
        )
    }

    fn executor(
        store: Arc<FakeStore>,
        prober: Arc<FakeProber>,
        prompt: Arc<FakePrompt>,
        notifier: Arc<FakeNotifier>,
    ) -> ValidationExecutor {
        ValidationExecutor::builder()
            .prober(prober)
            .site_store(store.clone())
            .approval_store(store)
            .trust_prompt(prompt)
            .notifier(notifier)
            .config(EngineConfig { prompt_timeout: Duration::from_secs(60), ..Default::default() })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn cycle_yields_exactly_one_result_and_persists_status() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let exec = executor(
            store.clone(),
            FakeProber::scripted(vec![ok_response()]),
            FakePrompt::silent(),
            Arc::new(FakeNotifier::default()),
        );

        let result = exec.run_cycle(site_id).await.unwrap().unwrap();

        assert_eq!(result.verdict, Verdict::Ok);
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1.verdict, Verdict::Ok);
    }

    #[tokio::test]
    async fn removed_site_skips_the_cycle() {
        let store = Arc::new(FakeStore::default());
        let exec = executor(
            store.clone(),
            FakeProber::scripted(vec![ok_response()]),
            FakePrompt::silent(),
            Arc::new(FakeNotifier::default()),
        );

        assert!(exec.run_cycle(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeat_verdicts_notify_once() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let notifier = Arc::new(FakeNotifier::default());
        let exec = executor(
            store,
            FakeProber::scripted(vec![Err(ProbeFailure::Timeout)]),
            FakePrompt::silent(),
            notifier.clone(),
        );

        for _ in 0..3 {
            let result = exec.run_cycle(site_id).await.unwrap().unwrap();
            assert_eq!(result.verdict, Verdict::Errored);
        }

        let events = notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1, "a site that stays down reports once");
        assert_eq!(events[0].previous, None);
        assert_eq!(events[0].current, Verdict::Errored);
    }

    #[tokio::test]
    async fn accepted_prompt_retries_once_with_override() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let fingerprint = Fingerprint::from_der(b"self-signed");
        let prober = FakeProber::scripted(vec![
            Err(ProbeFailure::UntrustedCertificate { fingerprint: fingerprint.clone() }),
            ok_response(),
        ]);
        let prompt = FakePrompt::answering(PromptAnswer::Accepted);
        let exec = executor(store.clone(), prober.clone(), prompt.clone(), Arc::new(FakeNotifier::default()));

        let result = exec.run_cycle(site_id).await.unwrap().unwrap();

        assert_eq!(result.verdict, Verdict::Ok);
        assert_eq!(prompt.requests.load(Ordering::SeqCst), 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2, "exactly one retry");
        assert_eq!(prober.override_calls.load(Ordering::SeqCst), 1);
        // Approval persisted: sticky for the next cycle.
        assert_eq!(
            store.approvals.lock().unwrap().get(&site_id),
            Some(&fingerprint)
        );
    }

    #[tokio::test]
    async fn approved_fingerprint_skips_the_prompt() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let fingerprint = Fingerprint::from_der(b"self-signed");
        store
            .approvals
            .lock()
            .unwrap()
            .insert(site_id, fingerprint.clone());

        let prober = FakeProber::scripted(vec![
            Err(ProbeFailure::UntrustedCertificate { fingerprint }),
            ok_response(),
        ]);
        let prompt = FakePrompt::silent();
        let exec = executor(store, prober, prompt.clone(), Arc::new(FakeNotifier::default()));

        let result = exec.run_cycle(site_id).await.unwrap().unwrap();

        assert_eq!(result.verdict, Verdict::Ok);
        assert_eq!(prompt.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_prompt_resolves_as_not_trusted() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let prober = FakeProber::scripted(vec![Err(ProbeFailure::UntrustedCertificate {
            fingerprint: Fingerprint::from_der(b"self-signed"),
        })]);
        let exec = executor(store, prober.clone(), FakePrompt::silent(), Arc::new(FakeNotifier::default()));

        let result = exec.run_cycle(site_id).await.unwrap().unwrap();

        assert_eq!(result.verdict, Verdict::Errored);
        assert!(result.reason.contains("certificate not trusted"));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1, "no retry without approval");
    }

    #[tokio::test]
    async fn rejected_prompt_resolves_as_not_trusted() {
        let site = test_site();
        let site_id = site.id;
        let store = FakeStore::with_site(site);
        let prober = FakeProber::scripted(vec![Err(ProbeFailure::UntrustedCertificate {
            fingerprint: Fingerprint::from_der(b"self-signed"),
        })]);
        let exec = executor(
            store.clone(),
            prober,
            FakePrompt::answering(PromptAnswer::Rejected),
            Arc::new(FakeNotifier::default()),
        );

        let result = exec.run_cycle(site_id).await.unwrap().unwrap();

        assert_eq!(result.verdict, Verdict::Errored);
        assert!(result.reason.contains("certificate not trusted"));
        assert!(store.approvals.lock().unwrap().is_empty());
    }
}
