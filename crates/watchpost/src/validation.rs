//! Pre-engine input validation.
//!
//! Sites are created and edited outside the engine; this module is the
//! gate that keeps malformed configurations from ever reaching it. Errors
//! are keyed by field so a form (or CLI) can surface them next to the
//! offending input. A plain-http URL is a warning, not an error.

use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::model::{CheckInterval, Site, ValidationRule};

/// Raw, not-yet-validated site fields as a form or config file supplies
/// them.
#[derive(Debug, Clone, Default)]
pub struct SiteDraft {
    pub name: String,
    pub url: String,
    pub interval_secs: Option<u64>,
    /// "status_code", "term_search" or "script".
    pub mode: String,
    /// Search term or script source, depending on the mode.
    pub content: Option<String>,
}

/// Field-keyed validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputErrors {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval: Option<String>,
    pub content: Option<String>,
}

impl InputErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.interval.is_none()
            && self.content.is_none()
    }
}

impl std::fmt::Display for InputErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, error) in [
            ("name", &self.name),
            ("url", &self.url),
            ("interval", &self.interval),
            ("content", &self.content),
        ] {
            if let Some(error) = error {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {error}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Non-blocking advisories about a site configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteWarning {
    /// Plain-http URL: checks work, but the exchange is unauthenticated.
    InsecureScheme,
}

/// Validate a draft and build the typed [`Site`] from it.
///
/// All fields are checked in one pass so the caller gets the complete
/// error set, not just the first problem.
pub fn build_site(draft: &SiteDraft) -> Result<(Site, Vec<SiteWarning>), InputErrors> {
    let mut errors = InputErrors::default();
    let mut warnings = Vec::new();

    if draft.name.trim().is_empty() {
        errors.name = Some("name must not be empty".into());
    }

    if draft.url.trim().is_empty() {
        errors.url = Some("URL must not be empty".into());
    } else {
        match Url::parse(draft.url.trim()) {
            Ok(url) => match url.scheme() {
                "https" => {}
                "http" => warnings.push(SiteWarning::InsecureScheme),
                other => {
                    errors.url = Some(format!("unsupported scheme: {other}"));
                }
            },
            Err(e) => {
                errors.url = Some(format!("not a valid URL: {e}"));
            }
        }
    }

    let interval = match draft.interval_secs {
        None => {
            errors.interval = Some("check interval is required".into());
            None
        }
        Some(secs) => match CheckInterval::try_new(Duration::from_secs(secs)) {
            Ok(interval) => Some(interval),
            Err(e) => {
                errors.interval = Some(e.to_string());
                None
            }
        },
    };

    let content = draft.content.as_deref().unwrap_or("").trim();
    let rule = match draft.mode.as_str() {
        "status_code" => Some(ValidationRule::StatusCode),
        "term_search" => match ValidationRule::term_search(content) {
            Ok(rule) => Some(rule),
            Err(e) => {
                errors.content = Some(e.to_string());
                None
            }
        },
        "script" => match ValidationRule::script(content) {
            Ok(rule) => Some(rule),
            Err(e) => {
                errors.content = Some(e.to_string());
                None
            }
        },
        other => {
            errors.content = Some(format!("unknown validation mode: {other}"));
            None
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    let site = Site {
        id: Uuid::new_v4(),
        name: draft.name.trim().to_string(),
        url: draft.url.trim().to_string(),
        interval: interval.expect("checked above"),
        rule: rule.expect("checked above"),
        last_status: None,
    };

    Ok((site, warnings))
}
