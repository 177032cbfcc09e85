//! Server discovery: find a live local server across hosts and ports.
//!
//! The pieces compose leaf-first:
//! - `strategy` enumerates candidate endpoints in a fixed order
//! - `liveness` probes one endpoint and classifies the outcome
//! - `scanner` runs probes concurrently under a deadline and picks the winner
//!
//! The checker sits behind the [`LivenessChecker`] trait so ordering,
//! timeout and tie-break logic can be tested without a network.

pub mod config;
pub mod errors;
pub mod liveness;
pub mod scanner;
pub mod strategy;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{PortRange, ScanConfig};
pub use errors::DiscoveryError;
pub use liveness::{HttpLivenessChecker, LivenessChecker, LivenessContract};
pub use scanner::PortScanner;
pub use strategy::candidates;
pub use types::{Endpoint, ProbeOutcome, ProbeResult};
