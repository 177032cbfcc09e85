//! Single-endpoint liveness probing.
//!
//! A probe is one short HTTP GET against the health path. It never retries:
//! retry policy belongs to the callers (scanner, session) so they can wrap
//! the same primitive differently.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::errors::DiscoveryError;
use super::types::{Endpoint, ProbeOutcome, ProbeResult};

/// Cheapest endpoint that proves the server speaks the expected API.
pub const DEFAULT_HEALTH_PATH: &str = "/api/v1/models";

/// Field the health response must carry when it is a JSON object.
pub const DEFAULT_LIVENESS_MARKER: &str = "data";

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Checks whether one endpoint hosts a live server.
///
/// Implementations must classify every failure into a [`ProbeOutcome`]
/// instead of erroring, and must return within roughly `timeout`.
#[async_trait]
pub trait LivenessChecker: Send + Sync {
    async fn check(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeResult;
}

// ─── Contract ────────────────────────────────────────────────────────────────

/// What a healthy response looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessContract {
    /// Path requested on each candidate.
    pub path: String,
    /// Field a JSON-object body must contain. A JSON array body is accepted
    /// as-is (some builds return the model list bare).
    pub marker: String,
}

impl Default for LivenessContract {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_PATH.to_string(),
            marker: DEFAULT_LIVENESS_MARKER.to_string(),
        }
    }
}

impl LivenessContract {
    /// Whether a 2xx body satisfies the contract.
    pub fn matches(&self, body: &[u8]) -> bool {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Array(_)) => true,
            Ok(serde_json::Value::Object(map)) => map.contains_key(&self.marker),
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if !self.path.starts_with('/') {
            return Err(DiscoveryError::InvalidConfig {
                reason: format!("health path '{}' must start with '/'", self.path),
            });
        }
        if self.marker.is_empty() {
            return Err(DiscoveryError::InvalidConfig {
                reason: "liveness marker must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ─── HTTP Checker ────────────────────────────────────────────────────────────

/// Probes endpoints with a plain HTTP GET.
pub struct HttpLivenessChecker {
    http: HttpClient,
    contract: LivenessContract,
}

impl HttpLivenessChecker {
    pub fn new(contract: LivenessContract) -> Result<Self, DiscoveryError> {
        contract.validate()?;

        // Candidates are local; never route probes through a system proxy.
        let http = HttpClient::builder()
            .no_proxy()
            .build()
            .map_err(|e| DiscoveryError::ClientBuild {
                reason: e.to_string(),
            })?;

        Ok(Self { http, contract })
    }

    pub fn contract(&self) -> &LivenessContract {
        &self.contract
    }

    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let response = match self.http.get(url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(e) => return classify_request_error(&e),
        };

        if !response.status().is_success() {
            tracing::debug!(url, status = response.status().as_u16(), "health check non-2xx");
            return ProbeOutcome::InvalidResponse;
        }

        match response.bytes().await {
            Ok(body) if self.contract.matches(&body) => ProbeOutcome::Alive,
            Ok(_) => ProbeOutcome::InvalidResponse,
            Err(e) if e.is_timeout() => ProbeOutcome::TimedOut,
            Err(_) => ProbeOutcome::InvalidResponse,
        }
    }
}

#[async_trait]
impl LivenessChecker for HttpLivenessChecker {
    async fn check(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
        let url = endpoint.url(&self.contract.path);
        let started = Instant::now();

        // reqwest's own timeout covers the request; the outer one also
        // bounds body reads and anything else that could stall.
        let outcome = tokio::time::timeout(timeout, self.probe(&url, timeout))
            .await
            .unwrap_or(ProbeOutcome::TimedOut);

        ProbeResult::new(endpoint.clone(), outcome, started.elapsed())
    }
}

/// Map a transport-level reqwest failure onto a probe outcome.
fn classify_request_error(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() {
        ProbeOutcome::TimedOut
    } else if err.is_connect() {
        ProbeOutcome::Refused
    } else {
        // Something accepted the connection but did not speak HTTP.
        ProbeOutcome::InvalidResponse
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
