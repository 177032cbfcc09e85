//! Value types produced and consumed by discovery.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Endpoint ────────────────────────────────────────────────────────────────

/// A `(host, port)` pair identifying a candidate server location.
///
/// Immutable once built. Equality and ordering are by `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for HTTP requests, e.g. `http://127.0.0.1:8000`.
    ///
    /// Bare IPv6 literals are wrapped in brackets.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Full URL for `path` on this endpoint. `path` should start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ─── Probe Results ───────────────────────────────────────────────────────────

/// Classification of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 2xx response whose body satisfies the liveness contract.
    Alive,
    /// Connection refused or network unreachable.
    Refused,
    /// No response within the probe timeout.
    TimedOut,
    /// Something answered, but not a compatible server.
    InvalidResponse,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeOutcome::Alive => "alive",
            ProbeOutcome::Refused => "refused",
            ProbeOutcome::TimedOut => "timed out",
            ProbeOutcome::InvalidResponse => "invalid response",
        };
        f.write_str(s)
    }
}

/// Outcome of probing one endpoint. Produced once per probe, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
}

impl ProbeResult {
    pub fn new(endpoint: Endpoint, outcome: ProbeOutcome, latency: Duration) -> Self {
        Self {
            endpoint,
            outcome,
            latency,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.outcome == ProbeOutcome::Alive
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_base_url() {
        let ep = Endpoint::new("localhost", 8000);
        assert_eq!(ep.base_url(), "http://localhost:8000");
        assert_eq!(ep.url("/api/v1/models"), "http://localhost:8000/api/v1/models");
        assert_eq!(ep.to_string(), "localhost:8000");
    }

    #[test]
    fn test_endpoint_ipv6_is_bracketed() {
        let ep = Endpoint::new("::1", 8020);
        assert_eq!(ep.base_url(), "http://[::1]:8020");
        assert_eq!(ep.to_string(), "[::1]:8020");
    }

    #[test]
    fn test_endpoint_equality_and_order() {
        let a = Endpoint::new("hostA", 8001);
        let b = Endpoint::new("hostA", 8002);
        assert_ne!(a, b);
        assert_eq!(a, Endpoint::new("hostA", 8001));
        assert!(a < b);
    }

    #[test]
    fn test_probe_result_is_alive() {
        let ep = Endpoint::new("127.0.0.1", 8000);
        let alive = ProbeResult::new(ep.clone(), ProbeOutcome::Alive, Duration::from_millis(3));
        let refused = ProbeResult::new(ep, ProbeOutcome::Refused, Duration::ZERO);
        assert!(alive.is_alive());
        assert!(!refused.is_alive());
    }
}
