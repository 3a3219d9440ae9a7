//! Probe client: one bounded HTTP exchange per call.
//!
//! No retry policy lives here. The orchestrator decides whether an
//! untrusted-certificate failure warrants a second probe with a trust
//! override; everything else is reported as a typed failure and retried
//! only implicitly by the next scheduled tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use crate::trust::Fingerprint;

/// Default redirect depth bound; beyond it the probe fails as a redirect
/// loop.
pub const DEFAULT_REDIRECT_CAP: usize = 5;

/// Default cap on how much of the response body is read. Truncation is not
/// an error; a term that only appears beyond the cap is an accepted
/// limitation of term-search validation.
pub const DEFAULT_BODY_CAP: usize = 256 * 1024;

/// A successful HTTP exchange, body capped.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub body_truncated: bool,
    /// SHA-256 of the leaf certificate, when the exchange used TLS and the
    /// client exposed the peer certificate.
    pub fingerprint: Option<Fingerprint>,
    pub elapsed_ms: u64,
}

/// Typed probe failures. `UntrustedCertificate` is distinguished from
/// generic transport errors so the orchestrator can route it to the trust
/// manager instead of giving up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeFailure {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("DNS lookup failed")]
    Dns,
    #[error("too many redirects")]
    RedirectLoop,
    #[error("certificate not trusted (sha256 {fingerprint})")]
    UntrustedCertificate { fingerprint: Fingerprint },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Raw outcome of one probe.
pub type ProbeOutcome = std::result::Result<ProbeResponse, ProbeFailure>;

/// Issues a single network request with a bounded timeout.
#[async_trait]
pub trait Prober: Send + Sync {
    /// One GET against `url`. The timeout covers the full exchange, not
    /// just connection setup. With a `trust_override`, an otherwise
    /// untrusted certificate is accepted iff its fingerprint matches.
    async fn probe(
        &self,
        url: &str,
        timeout: Duration,
        trust_override: Option<&Fingerprint>,
    ) -> ProbeOutcome;
}

/// reqwest-backed prober.
///
/// Two clients: a verifying one for normal probes, and a
/// verification-disabled one used (a) to capture the offending leaf
/// certificate after a trust handshake failure, and (b) to carry probes
/// running under a user trust override. The permissive client has
/// `tls_info` enabled so the peer certificate is readable off the
/// response, and every override probe is post-checked against the approved
/// fingerprint.
pub struct HttpProber {
    client: reqwest::Client,
    permissive: reqwest::Client,
    body_cap: usize,
}

impl HttpProber {
    pub fn new(body_cap: usize, redirect_cap: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(redirect_cap))
            .tls_info(true)
            .build()
            .context("failed to build HTTP client")?;

        let permissive = reqwest::Client::builder()
            .redirect(Policy::limited(redirect_cap))
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .build()
            .context("failed to build permissive HTTP client")?;

        Ok(Self { client, permissive, body_cap })
    }

    async fn read_response(&self, mut response: reqwest::Response) -> ProbeOutcome {
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let fingerprint = peer_fingerprint(&response);

        let mut body = Vec::new();
        let mut truncated = false;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if append_capped(&mut body, &chunk, self.body_cap) {
                        truncated = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(classify(&e)),
            }
        }

        Ok(ProbeResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            body_truncated: truncated,
            fingerprint,
            elapsed_ms: 0,
        })
    }

    /// Reconnect with verification disabled purely to read the leaf
    /// certificate the site is offering.
    async fn capture_fingerprint(&self, url: &str, timeout: Duration) -> Option<Fingerprint> {
        let response = self
            .permissive
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .ok()?;
        peer_fingerprint(&response)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(
        &self,
        url: &str,
        timeout: Duration,
        trust_override: Option<&Fingerprint>,
    ) -> ProbeOutcome {
        let client = if trust_override.is_some() { &self.permissive } else { &self.client };
        let start = Instant::now();

        let response = match client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = classify(&e);
                if matches!(failure, ProbeFailure::Transport(_)) && certificate_error(&e) {
                    // The verifying handshake failed on trust; fetch the
                    // offending chain so the trust manager can decide.
                    return match self.capture_fingerprint(url, timeout).await {
                        Some(fingerprint) => {
                            Err(ProbeFailure::UntrustedCertificate { fingerprint })
                        }
                        None => Err(failure),
                    };
                }
                return Err(failure);
            }
        };

        let mut outcome = self.read_response(response).await?;
        outcome.elapsed_ms = start.elapsed().as_millis() as u64;

        // Under an override, the certificate must still be the one the user
        // approved. A rotation between approval and probe re-prompts.
        if let Some(expected) = trust_override {
            match &outcome.fingerprint {
                Some(live) if live != expected => {
                    return Err(ProbeFailure::UntrustedCertificate { fingerprint: live.clone() });
                }
                _ => {}
            }
        }

        Ok(outcome)
    }
}

/// Append a chunk to the body under the cap. Returns true when part of the
/// chunk had to be dropped; a body that ends exactly at the cap is not
/// truncation.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let remaining = cap.saturating_sub(body.len());
    if chunk.len() > remaining {
        body.extend_from_slice(&chunk[..remaining]);
        true
    } else {
        body.extend_from_slice(chunk);
        false
    }
}

fn peer_fingerprint(response: &reqwest::Response) -> Option<Fingerprint> {
    let info = response.extensions().get::<reqwest::tls::TlsInfo>()?;
    let der = info.peer_certificate()?;
    Some(Fingerprint::from_der(der))
}

/// Map a reqwest error onto the probe failure taxonomy.
fn classify(error: &reqwest::Error) -> ProbeFailure {
    if error.is_timeout() {
        return ProbeFailure::Timeout;
    }
    if error.is_redirect() {
        return ProbeFailure::RedirectLoop;
    }
    if error.is_connect() {
        if chain_has_io_kind(error, std::io::ErrorKind::ConnectionRefused) {
            return ProbeFailure::ConnectionRefused;
        }
        if chain_mentions(error, &["dns", "lookup address", "name or service not known"]) {
            return ProbeFailure::Dns;
        }
    }
    ProbeFailure::Transport(error.to_string())
}

/// True when the error chain points at a TLS certificate trust problem.
fn certificate_error(error: &reqwest::Error) -> bool {
    chain_mentions(
        error,
        &["certificate", "unknownissuer", "self-signed", "self signed"],
    )
}

fn chain_mentions(error: &(dyn StdError + 'static), needles: &[&str]) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(e) = current {
        let text = e.to_string().to_lowercase();
        if needles.iter().any(|needle| text.contains(needle)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn chain_has_io_kind(error: &(dyn StdError + 'static), kind: std::io::ErrorKind) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == kind {
                return true;
            }
        }
        current = e.source();
    }
    false
}
