//! Session error types.
//!
//! Transient network failures are absorbed by the session's retry loop and
//! never reach the caller on their own: what escapes is either the final
//! `ConnectionLost`, or a non-transient failure that retrying cannot fix.

use thiserror::Error;

use crate::discovery::{DiscoveryError, Endpoint, ProbeOutcome};

/// Errors surfaced by a [`ConnectionSession`](super::ConnectionSession) and
/// the API client built on it.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A request was issued on a session with no bound endpoint.
    #[error("session is not bound to an endpoint")]
    NotBound,

    /// Discovery ran and found no live server.
    #[error("no live server found ({candidates} candidates probed in {elapsed_ms}ms)")]
    NotFound {
        candidates: usize,
        elapsed_ms: u64,
    },

    /// Self-healing gave up: retries and rescans found no live server.
    #[error("connection lost to {endpoint} after {attempts} retry attempts")]
    ConnectionLost {
        endpoint: Endpoint,
        attempts: u32,
    },

    /// An explicit bind target failed its liveness check.
    #[error("endpoint {endpoint} is not alive ({outcome})")]
    EndpointNotAlive {
        endpoint: Endpoint,
        outcome: ProbeOutcome,
    },

    /// Request or response violates the expected protocol. Not retried.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        reason: String,
    },

    /// The server answered with a non-2xx status. Not retried.
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
    },

    /// Invalid scan or retry configuration.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        reason: String,
    },

    /// A single request failed at the network level (refused, reset,
    /// timed out). Used inside the retry loop; callers only see it when
    /// the failure could not be classified any further.
    #[error("transport error talking to {endpoint}: {reason}")]
    Transport {
        endpoint: Endpoint,
        reason: String,
    },
}

impl SessionError {
    /// Whether the failure is a network-level condition worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transport { .. })
    }

    /// The response body, if this is an `Http` error.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            SessionError::Http { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<DiscoveryError> for SessionError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NotFound {
                candidates,
                elapsed_ms,
            } => SessionError::NotFound {
                candidates,
                elapsed_ms,
            },
            DiscoveryError::InvalidConfig { reason } => SessionError::InvalidConfig { reason },
            DiscoveryError::ClientBuild { reason } => SessionError::InvalidConfig { reason },
        }
    }
}
