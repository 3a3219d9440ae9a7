//! Validation rule evaluation.
//!
//! Rules only apply to successful exchanges; any probe failure short-cuts
//! to an errored result. A broken validator script is also an errored
//! result, never a failed one — a bug in the user's rule is not evidence
//! that the site is down.

use std::time::{Duration, Instant};

use crate::model::{ValidationResult, ValidationRule};
use crate::probe::{ProbeOutcome, ProbeResponse};

/// Sentinel pushed through the script interrupt hook on deadline.
const SCRIPT_TIMEOUT_TOKEN: &str = "validator timeout";

pub struct RuleEvaluator {
    script_budget: Duration,
}

impl RuleEvaluator {
    pub fn new(script_budget: Duration) -> Self {
        Self { script_budget }
    }

    /// Produce exactly one result for one probe outcome.
    pub async fn evaluate(&self, outcome: &ProbeOutcome, rule: &ValidationRule) -> ValidationResult {
        let response = match outcome {
            Ok(response) => response,
            Err(failure) => return ValidationResult::errored(failure.to_string()),
        };

        match rule {
            ValidationRule::StatusCode => evaluate_status_code(response),
            ValidationRule::TermSearch { term } => evaluate_term_search(response, term),
            ValidationRule::Script { source } => {
                self.evaluate_script(response, source.clone()).await
            }
        }
    }

    async fn evaluate_script(&self, response: &ProbeResponse, source: String) -> ValidationResult {
        let status = response.status;
        let body = response.body.clone();
        let headers = response.headers.clone();
        let budget = self.script_budget;

        // Scripts run on a blocking thread; the engine's progress hook
        // enforces the deadline even against busy loops.
        let run = tokio::task::spawn_blocking(move || {
            run_script(&source, status, body, headers, budget)
        })
        .await;

        match run {
            Ok(Ok(true)) => ValidationResult::ok("script returned true"),
            Ok(Ok(false)) => ValidationResult::failed("script returned false"),
            Ok(Err(fault)) => ValidationResult::errored(fault),
            Err(join_error) => {
                ValidationResult::errored(format!("validator panicked: {join_error}"))
            }
        }
    }
}

fn evaluate_status_code(response: &ProbeResponse) -> ValidationResult {
    if (200..400).contains(&response.status) {
        ValidationResult::ok(format!("HTTP {}", response.status))
    } else {
        ValidationResult::failed(format!("unexpected status code {}", response.status))
    }
}

fn evaluate_term_search(response: &ProbeResponse, term: &str) -> ValidationResult {
    if response.body.contains(term) {
        ValidationResult::ok(format!("term {term:?} found in response body"))
    } else {
        ValidationResult::failed(format!("term {term:?} not found in response body"))
    }
}

/// Execute a validation script in a sandboxed interpreter.
///
/// The response is injected as read-only constants: `status` (integer),
/// `body` (string) and `headers` (map). The script must evaluate to a
/// boolean; anything else is a validator fault.
fn run_script(
    source: &str,
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
    budget: Duration,
) -> Result<bool, String> {
    let mut engine = rhai::Engine::new();
    let deadline = Instant::now() + budget;
    engine.on_progress(move |_operations| {
        if Instant::now() >= deadline {
            Some(SCRIPT_TIMEOUT_TOKEN.into())
        } else {
            None
        }
    });

    let mut scope = rhai::Scope::new();
    scope.push_constant("status", status as i64);
    scope.push_constant("body", body);
    let mut header_map = rhai::Map::new();
    for (name, value) in headers {
        header_map.insert(name.into(), value.into());
    }
    scope.push_constant("headers", header_map);

    let value = engine
        .eval_with_scope::<rhai::Dynamic>(&mut scope, source)
        .map_err(|error| match *error {
            rhai::EvalAltResult::ErrorTerminated(..) => SCRIPT_TIMEOUT_TOKEN.to_string(),
            other => format!("validator error: {other}"),
        })?;

    value
        .as_bool()
        .map_err(|actual| format!("validator returned {actual}, expected a boolean"))
}
