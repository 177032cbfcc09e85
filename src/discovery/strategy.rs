//! Candidate enumeration.
//!
//! Ports vary innermost: every port of the first host is tried before the
//! next host. The sequence is lazy so a scan that finds a match early never
//! materializes the rest of the candidate space.

use super::config::ScanConfig;
use super::types::Endpoint;

/// Enumerate every `(host, port)` pair of `config` in probe order.
///
/// Pure and deterministic: the same config always yields the same sequence.
pub fn candidates(config: &ScanConfig) -> impl Iterator<Item = Endpoint> + '_ {
    let range = config.port_range;
    config
        .host_candidates
        .iter()
        .flat_map(move |host| {
            (range.start..=range.end).map(move |port| Endpoint::new(host.as_str(), port))
        })
}
