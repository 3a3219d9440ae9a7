//! Status reconciliation: fold a cycle's result into the site's persisted
//! status and decide whether a change event is due.

use crate::model::{Site, SiteStatus, StatusChangeEvent, ValidationResult};

/// Compare the new result to the site's last known status.
///
/// An event is produced only when the verdict transitions; a site that
/// stays down across cycles produces exactly one event, on the cycle where
/// it first went down. A site with no prior status is an implicit
/// "unknown", so the first-ever check always produces one event.
pub fn reconcile(site: &Site, result: &ValidationResult) -> (SiteStatus, Option<StatusChangeEvent>) {
    let status = SiteStatus::from(result);
    let previous = site.last_verdict();

    let event = if previous != Some(result.verdict) {
        Some(StatusChangeEvent {
            site_id: site.id,
            previous,
            current: result.verdict,
            reason: result.reason.clone(),
            at: result.checked_at,
        })
    } else {
        None
    };

    (status, event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckInterval, Verdict};
    use std::time::Duration;

    fn site_with_status(status: Option<SiteStatus>) -> Site {
        let mut site = Site::new(
            "example",
            "https://example.com",
            CheckInterval::clamped(Duration::from_secs(60)),
        );
        site.last_status = status;
        site
    }

    #[test]
    fn first_check_reports_once_even_when_ok() {
        let site = site_with_status(None);
        let (status, event) = reconcile(&site, &ValidationResult::ok("HTTP 200"));

        assert_eq!(status.verdict, Verdict::Ok);
        let event = event.expect("first check is a transition from unknown");
        assert_eq!(event.previous, None);
        assert_eq!(event.current, Verdict::Ok);
    }

    #[test]
    fn transition_emits_event() {
        let previous = SiteStatus::from(&ValidationResult::ok("HTTP 200"));
        let site = site_with_status(Some(previous));

        let (_, event) = reconcile(&site, &ValidationResult::failed("unexpected status code 500"));

        let event = event.expect("verdict changed");
        assert_eq!(event.previous, Some(Verdict::Ok));
        assert_eq!(event.current, Verdict::Failed);
    }

    #[test]
    fn repeat_verdict_is_silent_but_status_still_refreshes() {
        let previous = SiteStatus::from(&ValidationResult::failed("unexpected status code 500"));
        let site = site_with_status(Some(previous.clone()));

        let newer = ValidationResult::failed("unexpected status code 503");
        let (status, event) = reconcile(&site, &newer);

        assert!(event.is_none(), "repeat failure must not re-notify");
        assert_eq!(status.reason, "unexpected status code 503");
        assert!(status.checked_at >= previous.checked_at);
    }

    #[test]
    fn failed_and_errored_are_distinct_transitions() {
        let previous = SiteStatus::from(&ValidationResult::failed("rule mismatch"));
        let site = site_with_status(Some(previous));

        let (_, event) = reconcile(&site, &ValidationResult::errored("request timed out"));
        assert!(event.is_some(), "failed -> errored is a real transition");
    }
}
