use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How often a site is checked. The inner value is whole seconds,
/// clamped to [`CheckInterval::MIN`]..=[`CheckInterval::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckInterval(u64);

impl CheckInterval {
    /// Sub-minute intervals are not allowed; they hammer targets for no
    /// monitoring benefit.
    pub const MIN: Duration = Duration::from_secs(60);
    /// One day. Anything above this starves the scheduler of useful work.
    pub const MAX: Duration = Duration::from_secs(86_400);

    /// Build an interval, clamping out-of-range values into the window.
    pub fn clamped(duration: Duration) -> Self {
        let secs = duration
            .as_secs()
            .clamp(Self::MIN.as_secs(), Self::MAX.as_secs());
        Self(secs)
    }

    /// Build an interval, rejecting out-of-range values.
    pub fn try_new(duration: Duration) -> Result<Self, InvalidSite> {
        let secs = duration.as_secs();
        if secs < Self::MIN.as_secs() || secs > Self::MAX.as_secs() {
            return Err(InvalidSite::IntervalOutOfRange(secs));
        }
        Ok(Self(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

/// Construction errors for site fields. These are programming/input errors
/// caught before a site ever reaches the engine, not check failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSite {
    #[error("check interval out of range: {0} seconds")]
    IntervalOutOfRange(u64),
    #[error("search term must not be empty")]
    EmptyTerm,
    #[error("validation script must not be empty")]
    EmptyScript,
}

/// The rule family used to judge a probe's response. Content-carrying
/// variants are non-empty by construction, so a rule can never reach the
/// evaluator missing its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Pass when the HTTP status is in [200, 400).
    StatusCode,
    /// Pass when the response body contains the term (case-sensitive).
    TermSearch { term: String },
    /// Pass when the embedded script evaluates to `true`.
    Script { source: String },
}

impl ValidationRule {
    pub fn term_search(term: impl Into<String>) -> Result<Self, InvalidSite> {
        let term = term.into();
        if term.trim().is_empty() {
            return Err(InvalidSite::EmptyTerm);
        }
        Ok(Self::TermSearch { term })
    }

    pub fn script(source: impl Into<String>) -> Result<Self, InvalidSite> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(InvalidSite::EmptyScript);
        }
        Ok(Self::Script { source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusCode => "status_code",
            Self::TermSearch { .. } => "term_search",
            Self::Script { .. } => "script",
        }
    }
}

/// Classification of a single check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Site reachable and the rule matched.
    Ok,
    /// Site reachable but the rule did not match.
    Failed,
    /// The check itself could not complete: network failure, untrusted
    /// certificate, or a broken validator. Not evidence the site is down.
    Errored,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Ok => write!(f, "ok"),
            Verdict::Failed => write!(f, "failed"),
            Verdict::Errored => write!(f, "errored"),
        }
    }
}

/// Last persisted status of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub verdict: Verdict,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
}

/// Product of one check cycle. Ephemeral; the reconciler folds it into the
/// site's persisted status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdict: Verdict,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self::with_verdict(Verdict::Ok, reason)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::with_verdict(Verdict::Failed, reason)
    }

    pub fn errored(reason: impl Into<String>) -> Self {
        Self::with_verdict(Verdict::Errored, reason)
    }

    fn with_verdict(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self { verdict, reason: reason.into(), checked_at: Utc::now() }
    }
}

impl From<&ValidationResult> for SiteStatus {
    fn from(result: &ValidationResult) -> Self {
        Self {
            verdict: result.verdict,
            reason: result.reason.clone(),
            checked_at: result.checked_at,
        }
    }
}

/// Emitted when a site's verdict transitions, never on a repeat verdict.
/// `previous` is `None` for the first-ever check of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub site_id: Uuid,
    pub previous: Option<Verdict>,
    pub current: Verdict,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A monitored endpoint. Owned by persistence; the engine receives a
/// read-only snapshot per cycle and writes back only the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub interval: CheckInterval,
    pub rule: ValidationRule,
    pub last_status: Option<SiteStatus>,
}

impl Site {
    pub fn new(name: impl Into<String>, url: impl Into<String>, interval: CheckInterval) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            interval,
            rule: ValidationRule::StatusCode,
            last_status: None,
        }
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn last_verdict(&self) -> Option<Verdict> {
        self.last_status.as_ref().map(|s| s.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_clamps_into_window() {
        assert_eq!(CheckInterval::clamped(Duration::from_secs(5)).as_secs(), 60);
        assert_eq!(CheckInterval::clamped(Duration::from_secs(300)).as_secs(), 300);
        assert_eq!(
            CheckInterval::clamped(Duration::from_secs(1_000_000)).as_secs(),
            86_400
        );
    }

    #[test]
    fn interval_try_new_rejects_out_of_range() {
        assert!(CheckInterval::try_new(Duration::from_secs(59)).is_err());
        assert!(CheckInterval::try_new(Duration::from_secs(60)).is_ok());
        assert!(CheckInterval::try_new(Duration::from_secs(86_401)).is_err());
    }

    #[test]
    fn content_rules_reject_empty_content() {
        assert_eq!(ValidationRule::term_search("  "), Err(InvalidSite::EmptyTerm));
        assert_eq!(ValidationRule::script(""), Err(InvalidSite::EmptyScript));
        assert!(ValidationRule::term_search("healthy").is_ok());
    }
}
