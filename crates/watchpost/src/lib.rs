//! watchpost — site validation engine.
//!
//! Monitors a set of network endpoints on per-site schedules, classifies
//! each check as ok / failed / errored through a pluggable validation
//! rule, reconciles TLS trust decisions for self-signed certificates, and
//! emits an event exactly when a site's verdict changes.
//!
//! The engine owns no persistence, no UI and no process lifecycle; those
//! collaborators sit behind the traits in [`ports`]. A host assembles the
//! engine once at startup through [`ValidationExecutor::builder`] and
//! hands sites to the [`CheckScheduler`].

pub mod executor;
pub mod model;
pub mod ports;
pub mod probe;
pub mod reconcile;
pub mod rules;
pub mod scheduler;
pub mod trust;
pub mod validation;

pub use executor::{EngineBuilder, EngineConfig, ValidationExecutor};
pub use model::{
    CheckInterval, InvalidSite, Site, SiteStatus, StatusChangeEvent, ValidationResult,
    ValidationRule, Verdict,
};
pub use ports::{ApprovalStore, Notifier, PromptAnswer, SiteStore, TrustPrompt};
pub use probe::{HttpProber, ProbeFailure, ProbeOutcome, ProbeResponse, Prober};
pub use reconcile::reconcile;
pub use scheduler::CheckScheduler;
pub use trust::{Fingerprint, TrustDecision, TrustManager};
pub use validation::{build_site, InputErrors, SiteDraft, SiteWarning};
