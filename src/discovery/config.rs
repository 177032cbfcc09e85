//! Scan configuration.
//!
//! A `ScanConfig` is a plain immutable value handed to the scanner for the
//! duration of one scan. Defaults live in the `Default` impl, not in globals,
//! so tests can run isolated configurations side by side.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::DiscoveryError;

// ─── Defaults ────────────────────────────────────────────────────────────────

/// Loopback first: it is where a local server almost always lives.
pub const DEFAULT_HOSTS: &[&str] = &["127.0.0.1", "localhost"];

pub const DEFAULT_PORT_START: u16 = 8000;
pub const DEFAULT_PORT_END: u16 = 9000;

/// Per-probe budget. A local server answers in a few ms; anything slower
/// than this is treated as absent.
pub const DEFAULT_PER_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub const DEFAULT_TOTAL_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CONCURRENCY: usize = 32;

// ─── PortRange ───────────────────────────────────────────────────────────────

/// Inclusive port range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// A range holding exactly one port.
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Number of ports in the range (0 if the range is inverted).
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_START, DEFAULT_PORT_END)
    }
}

// ─── ScanConfig ──────────────────────────────────────────────────────────────

/// Parameters for one discovery scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Hosts to try, in priority order.
    pub host_candidates: Vec<String>,
    /// Ports to try on each host, ascending.
    pub port_range: PortRange,
    /// Budget for a single liveness probe.
    pub per_probe_timeout: Duration,
    /// Budget for the whole scan. Authoritative: no probe outlives it.
    pub total_scan_timeout: Duration,
    /// Maximum number of probes in flight at once.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            host_candidates: DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            port_range: PortRange::default(),
            per_probe_timeout: DEFAULT_PER_PROBE_TIMEOUT,
            total_scan_timeout: DEFAULT_TOTAL_SCAN_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ScanConfig {
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_candidates = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = PortRange::new(start, end);
        self
    }

    pub fn with_per_probe_timeout(mut self, timeout: Duration) -> Self {
        self.per_probe_timeout = timeout;
        self
    }

    pub fn with_total_scan_timeout(mut self, timeout: Duration) -> Self {
        self.total_scan_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Size of the candidate space, `hosts × ports`.
    pub fn candidate_count(&self) -> usize {
        self.host_candidates.len() * self.port_range.len()
    }

    /// Reject configurations that cannot describe a meaningful scan.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let invalid = |reason: &str| DiscoveryError::InvalidConfig {
            reason: reason.to_string(),
        };

        if self.host_candidates.is_empty() {
            return Err(invalid("host_candidates must not be empty"));
        }
        if self.host_candidates.iter().any(|h| h.trim().is_empty()) {
            return Err(invalid("host_candidates must not contain empty hosts"));
        }
        if self.port_range.start == 0 {
            return Err(invalid("port_range.start must be at least 1"));
        }
        if self.port_range.start > self.port_range.end {
            return Err(DiscoveryError::InvalidConfig {
                reason: format!(
                    "port_range start {} is greater than end {}",
                    self.port_range.start, self.port_range.end
                ),
            });
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if self.per_probe_timeout.is_zero() {
            return Err(invalid("per_probe_timeout must be non-zero"));
        }
        if self.total_scan_timeout.is_zero() {
            return Err(invalid("total_scan_timeout must be non-zero"));
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
