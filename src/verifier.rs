// verifier.rs - 302 cache poisoning verification
// Baseline without the header, then two cache-busted probes with it. Only two agreeing,
// reflected 302 Locations count as a verified finding.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::comparator::{compare_responses, detect_reflection, ComparisonReport, DEFAULT_THRESHOLD};
use crate::config::PROBE_DELAY;
use crate::error::TransportError;
use crate::http::{HttpTransport, ProbeRequest, ProbeResult};

/// Cache busters minted per attempt: one for the baseline, the rest for probes
pub const CACHE_BUSTERS_PER_ATTEMPT: usize = 3;
pub const REQUIRED_SUCCESSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    BaselinePending,
    BaselineOk,
    Probing,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    BaselineError(String),
    AlreadyReflected,
    Inconsistent,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BaselineError(err) => write!(f, "baseline error: {}", err),
            RejectReason::AlreadyReflected => f.write_str("already reflected"),
            RejectReason::Inconsistent => f.write_str("inconsistent or insufficient 302 responses"),
        }
    }
}

/// One reflected 302 observed while probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSuccess {
    pub url: String,
    pub status: u16,
    pub location: String,
    pub headers: BTreeMap<String, String>,
    pub comparison: ComparisonReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Verified(ProbeSuccess),
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub verdict: Verdict,
    /// Probes sent with the header injected (the baseline is not counted)
    pub probes_sent: usize,
}

impl Verification {
    pub fn state(&self) -> VerificationState {
        match self.verdict {
            Verdict::Verified(_) => VerificationState::Verified,
            Verdict::Rejected(_) => VerificationState::Rejected,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.verdict, Verdict::Verified(_))
    }
}

/// Internal protocol position; mirrors `VerificationState` while carrying the baseline
enum Step {
    BaselinePending,
    BaselineOk(ProbeResult),
    Probing(ProbeResult),
    Done(Verdict),
}

/// Fresh, never reused query token: `verify_<secs>_<index>_<8 hex>`
pub fn mint_cache_busters(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let secs = Utc::now().timestamp();
    (0..count)
        .map(|i| format!("verify_{}_{}_{:08x}", secs, i, rng.r#gen::<u32>()))
        .collect()
}

pub fn with_cache_buster(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}cb={}", url, separator, token)
}

pub struct PoisoningVerifier {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    probe_delay: Duration,
}

impl PoisoningVerifier {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            probe_delay: PROBE_DELAY,
        }
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Run the full protocol for one (url, header, value) triple
    pub async fn verify(&self, url: &str, header: &str, value: &str) -> Verification {
        let busters = mint_cache_busters(CACHE_BUSTERS_PER_ATTEMPT);
        let mut probes_sent = 0;
        let mut step = Step::BaselinePending;

        let verdict = loop {
            step = match step {
                Step::BaselinePending => match self.fetch_baseline(url, &busters[0]).await {
                    Err(err) => Step::Done(Verdict::Rejected(RejectReason::BaselineError(err.to_string()))),
                    Ok(baseline) if baseline.status == 302 && detect_reflection(baseline.location(), value) => {
                        Step::Done(Verdict::Rejected(RejectReason::AlreadyReflected))
                    }
                    Ok(baseline) => Step::BaselineOk(baseline),
                },
                Step::BaselineOk(baseline) => Step::Probing(baseline),
                Step::Probing(baseline) => {
                    let (successes, sent) = self.probe(url, header, value, &baseline, &busters[1..]).await;
                    probes_sent = sent;
                    Step::Done(decide(successes))
                }
                Step::Done(verdict) => break verdict,
            };
        };

        Verification { verdict, probes_sent }
    }

    async fn fetch_baseline(&self, url: &str, buster: &str) -> Result<ProbeResult, TransportError> {
        let request = ProbeRequest::get(with_cache_buster(url, buster), self.timeout);
        self.transport.fetch(request).await
    }

    async fn probe(
        &self,
        url: &str,
        header: &str,
        value: &str,
        baseline: &ProbeResult,
        busters: &[String],
    ) -> (Vec<ProbeSuccess>, usize) {
        let mut successes = Vec::new();
        let mut sent = 0;

        for (idx, buster) in busters.iter().enumerate() {
            if idx > 0 && !self.probe_delay.is_zero() {
                sleep(self.probe_delay).await;
            }

            let probe_url = with_cache_buster(url, buster);
            let request = ProbeRequest::get(&probe_url, self.timeout).with_header(header, value);
            sent += 1;

            let response = match self.transport.fetch(request).await {
                Ok(response) => response,
                Err(_) => continue,
            };

            if response.status != 302 || !detect_reflection(response.location(), value) {
                continue;
            }

            let (_, comparison) = compare_responses(baseline, &response, value, DEFAULT_THRESHOLD);
            successes.push(ProbeSuccess {
                url: probe_url,
                status: response.status,
                location: response.location().unwrap_or_default().to_string(),
                headers: response.headers.clone(),
                comparison,
            });
        }

        (successes, sent)
    }
}

/// At least two successes, all pointing at the byte-identical Location
fn decide(mut successes: Vec<ProbeSuccess>) -> Verdict {
    let consistent = successes.len() >= REQUIRED_SUCCESSES
        && successes.iter().all(|s| s.location == successes[0].location);

    if consistent {
        Verdict::Verified(successes.swap_remove(0))
    } else {
        Verdict::Rejected(RejectReason::Inconsistent)
    }
}
