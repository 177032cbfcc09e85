//! Port scanner: drives the candidate sequence through a liveness checker.
//!
//! Probes run as independent tokio tasks, at most `concurrency` at a time.
//! The scan deadline is authoritative: once it passes nothing new is
//! dispatched and outstanding probes are aborted, their late results lost.
//!
//! Results are deterministic regardless of completion order. An alive
//! candidate is only returned once every candidate before it in probe order
//! has settled as not alive, so a concurrent scan answers exactly what a
//! sequential scan would.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;

use super::config::ScanConfig;
use super::errors::DiscoveryError;
use super::liveness::LivenessChecker;
use super::strategy::candidates;
use super::types::{Endpoint, ProbeOutcome, ProbeResult};

/// Finds live servers by probing a [`ScanConfig`]'s candidate space.
#[derive(Clone)]
pub struct PortScanner {
    checker: Arc<dyn LivenessChecker>,
}

impl PortScanner {
    pub fn new(checker: Arc<dyn LivenessChecker>) -> Self {
        Self { checker }
    }

    /// Probe a single endpoint, hard-bounded by `timeout`.
    pub async fn check(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
        probe(Arc::clone(&self.checker), endpoint.clone(), timeout).await
    }

    /// Return the first alive endpoint in probe order.
    ///
    /// Fails with [`DiscoveryError::NotFound`] when the candidate space is
    /// exhausted or the total deadline passes without a hit.
    pub async fn scan(&self, config: &ScanConfig) -> Result<Endpoint, DiscoveryError> {
        config.validate()?;

        let started = Instant::now();
        let deadline = scan_deadline(started, config.total_scan_timeout);
        let mut queue = candidates(config).enumerate().peekable();
        let mut in_flight: JoinSet<(usize, ProbeResult)> = JoinSet::new();
        let mut handles: BTreeMap<usize, AbortHandle> = BTreeMap::new();
        let mut best: Option<(usize, Endpoint)> = None;
        let mut dispatched = 0usize;

        loop {
            // Top up. Nothing at or past the current best can win, so stop
            // feeding once the queue reaches it.
            while in_flight.len() < config.concurrency && Instant::now() < deadline {
                let Some((index, endpoint)) = queue
                    .next_if(|(i, _)| best.as_ref().map_or(true, |(b, _)| i < b))
                else {
                    break;
                };
                let handle = in_flight.spawn(probe_indexed(
                    Arc::clone(&self.checker),
                    index,
                    endpoint,
                    config.per_probe_timeout,
                ));
                handles.insert(index, handle);
                dispatched += 1;
            }

            if let Some((b, _)) = &best {
                if handles.range(..*b).next().is_none() {
                    break;
                }
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(
                        in_flight = in_flight.len(),
                        "scan deadline reached, abandoning outstanding probes"
                    );
                    break;
                }
                joined = in_flight.join_next() => {
                    let Some((index, result)) = settle(joined) else { continue };
                    if handles.remove(&index).is_none() {
                        // Aborted after it had already finished.
                        continue;
                    }
                    tracing::debug!(
                        endpoint = %result.endpoint,
                        outcome = %result.outcome,
                        latency_ms = result.latency.as_millis() as u64,
                        "probe finished"
                    );
                    if result.is_alive() && best.as_ref().map_or(true, |(b, _)| index < *b) {
                        for (_, handle) in handles.split_off(&(index + 1)) {
                            handle.abort();
                        }
                        best = Some((index, result.endpoint));
                    }
                }
            }
        }

        // Dropping the set aborts whatever is still running.
        drop(in_flight);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match best {
            Some((_, endpoint)) => {
                tracing::info!(
                    endpoint = %endpoint,
                    probed = dispatched,
                    elapsed_ms,
                    "server found"
                );
                Ok(endpoint)
            }
            None => {
                tracing::info!(probed = dispatched, elapsed_ms, "no live server found");
                Err(DiscoveryError::NotFound {
                    candidates: dispatched,
                    elapsed_ms,
                })
            }
        }
    }

    /// Probe the whole candidate space and return every alive endpoint in
    /// probe order. An empty result is not an error.
    ///
    /// The total deadline still applies; endpoints not probed by then are
    /// simply missing from the result.
    pub async fn scan_all(&self, config: &ScanConfig) -> Result<Vec<Endpoint>, DiscoveryError> {
        config.validate()?;

        let started = Instant::now();
        let deadline = scan_deadline(started, config.total_scan_timeout);
        let mut queue = candidates(config).enumerate();
        let mut in_flight: JoinSet<(usize, ProbeResult)> = JoinSet::new();
        let mut alive: BTreeMap<usize, Endpoint> = BTreeMap::new();
        let mut exhausted = false;

        loop {
            while !exhausted && in_flight.len() < config.concurrency && Instant::now() < deadline {
                match queue.next() {
                    Some((index, endpoint)) => {
                        in_flight.spawn(probe_indexed(
                            Arc::clone(&self.checker),
                            index,
                            endpoint,
                            config.per_probe_timeout,
                        ));
                    }
                    None => exhausted = true,
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        found = alive.len(),
                        "scan deadline reached before the candidate space was covered"
                    );
                    break;
                }
                joined = in_flight.join_next() => {
                    if let Some((index, result)) = settle(joined) {
                        if result.is_alive() {
                            alive.insert(index, result.endpoint);
                        }
                    }
                }
            }
        }

        let found: Vec<Endpoint> = alive.into_values().collect();
        tracing::info!(
            found = found.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "full scan finished"
        );
        Ok(found)
    }
}

/// Roughly thirty years; stands in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `started + budget`, saturating instead of overflowing the clock.
fn scan_deadline(started: Instant, budget: Duration) -> Instant {
    started
        .checked_add(budget)
        .unwrap_or_else(|| started + FAR_FUTURE)
}

/// Run one probe under a hard timeout, whatever the checker does.
async fn probe(
    checker: Arc<dyn LivenessChecker>,
    endpoint: Endpoint,
    timeout: Duration,
) -> ProbeResult {
    let started = Instant::now();
    let checked = tokio::time::timeout(timeout, checker.check(&endpoint, timeout)).await;
    match checked {
        Ok(result) => result,
        Err(_) => ProbeResult::new(endpoint, ProbeOutcome::TimedOut, started.elapsed()),
    }
}

async fn probe_indexed(
    checker: Arc<dyn LivenessChecker>,
    index: usize,
    endpoint: Endpoint,
    timeout: Duration,
) -> (usize, ProbeResult) {
    (index, probe(checker, endpoint, timeout).await)
}

/// Unwrap a joined probe. Cancelled probes yield `None`; a panicking
/// checker is a bug and is propagated.
fn settle(
    joined: Option<Result<(usize, ProbeResult), tokio::task::JoinError>>,
) -> Option<(usize, ProbeResult)> {
    match joined? {
        Ok(done) => Some(done),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
