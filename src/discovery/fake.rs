//! Scripted liveness checker for tests.
//!
//! Endpoints are alive only when marked so; everything else is refused.
//! Every probe is recorded in dispatch order.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::liveness::LivenessChecker;
use super::types::{Endpoint, ProbeOutcome, ProbeResult};

#[derive(Default)]
pub(crate) struct ScriptedChecker {
    alive: Mutex<HashSet<Endpoint>>,
    delays: Mutex<HashMap<Endpoint, Duration>>,
    default_delay: Duration,
    probes: Mutex<Vec<(Endpoint, Instant)>>,
}

impl ScriptedChecker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub(crate) fn with_alive(self, endpoint: Endpoint) -> Self {
        self.set_alive(&endpoint, true);
        self
    }

    pub(crate) fn with_delay(self, endpoint: Endpoint, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(endpoint, delay);
        self
    }

    pub(crate) fn set_alive(&self, endpoint: &Endpoint, alive: bool) {
        let mut set = self.alive.lock().unwrap();
        if alive {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// Endpoints probed so far, in the order probes started.
    pub(crate) fn probed(&self) -> Vec<Endpoint> {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    pub(crate) fn probe_count(&self, endpoint: &Endpoint) -> usize {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    /// When each probe of `endpoint` started, on the tokio clock.
    pub(crate) fn probe_times(&self, endpoint: &Endpoint) -> Vec<Instant> {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl LivenessChecker for ScriptedChecker {
    async fn check(&self, endpoint: &Endpoint, _timeout: Duration) -> ProbeResult {
        self.probes
            .lock()
            .unwrap()
            .push((endpoint.clone(), Instant::now()));

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = if self.alive.lock().unwrap().contains(endpoint) {
            ProbeOutcome::Alive
        } else {
            ProbeOutcome::Refused
        };
        ProbeResult::new(endpoint.clone(), outcome, delay)
    }
}
