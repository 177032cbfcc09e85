//! Discovery error types.
//!
//! Individual probe failures are not errors: they are classified as a
//! [`ProbeOutcome`](super::types::ProbeOutcome) and folded into the scan.
//! Only scan-level results surface here.

use thiserror::Error;

/// Errors that can occur while scanning for a server.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The scan finished (or hit its deadline) without an alive endpoint.
    ///
    /// This is an expected outcome, e.g. the server has not started yet.
    #[error("no live server found ({candidates} candidates probed in {elapsed_ms}ms)")]
    NotFound {
        candidates: usize,
        elapsed_ms: u64,
    },

    /// The scan configuration is structurally invalid.
    #[error("invalid scan config: {reason}")]
    InvalidConfig {
        reason: String,
    },

    /// The HTTP client used for probing could not be built.
    #[error("failed to build probe client: {reason}")]
    ClientBuild {
        reason: String,
    },
}

impl DiscoveryError {
    /// Whether this is the recoverable "nothing found" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscoveryError::NotFound { .. })
    }
}
