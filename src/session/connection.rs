//! Self-healing connection session.
//!
//! A session wraps one confirmed endpoint and issues requests against it.
//! When a request fails at the network level the session degrades, retries
//! with exponential backoff, re-checks the endpoint before every retry, and
//! re-runs discovery when the endpoint is gone (the server may have come
//! back on another port). When retries run out it unbinds and reports
//! `ConnectionLost`; it never retries forever.
//!
//! State sits behind a mutex that is only held for short reads and writes,
//! never across a network call or a backoff sleep, so `state()` reports
//! `Degraded` while recovery runs and `unbind()` can cut a recovery short.
//! A second lock serializes discovery and recovery; a caller whose request
//! failed while another caller was recovering replays once on the healed
//! binding instead of starting its own retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::Value;
use tokio::sync::Mutex;

use super::errors::SessionError;
use super::retry::RetryPolicy;
use crate::config::ClientConfig;
use crate::discovery::{
    DiscoveryError, Endpoint, HttpLivenessChecker, LivenessChecker, PortScanner, ScanConfig,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout for API requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total timeout for one API request. Generation on a local model can be
/// slow, so this is much longer than a probe.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Public Types ────────────────────────────────────────────────────────────

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No endpoint. Requests fail with `NotBound` until discovery or bind.
    Unbound,
    /// Endpoint last confirmed alive by a scan, a check or a request.
    Bound,
    /// Endpoint failed a request; recovery is in progress.
    Degraded,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unbound => "unbound",
            SessionState::Bound => "bound",
            SessionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// HTTP method of an [`ApiCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// One request the session can replay against whichever endpoint is bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: HttpMethod,
    /// Absolute path, e.g. `/api/v1/models`.
    pub path: String,
    pub body: Option<Value>,
}

impl ApiCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Timeouts applied to API requests (not probes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ─── ConnectionSession ───────────────────────────────────────────────────────

struct SessionInner {
    state: SessionState,
    bound: Option<Endpoint>,
    /// Survives `unbind()` so the next discovery can try it first.
    last_good: Option<Endpoint>,
    /// Config of the last discovery; recovery rescans with it.
    scan_config: ScanConfig,
    /// Bumped whenever the binding changes or a degraded session is
    /// confirmed healthy again. Lets a failed request tell whether someone
    /// else already dealt with the failure.
    epoch: u64,
}

impl SessionInner {
    fn bind(&mut self, endpoint: Endpoint) {
        self.bound = Some(endpoint);
        self.state = SessionState::Bound;
        self.epoch += 1;
    }

    fn confirm(&mut self, endpoint: Endpoint) {
        self.last_good = Some(endpoint.clone());
        if self.state != SessionState::Bound || self.bound.as_ref() != Some(&endpoint) {
            self.bind(endpoint);
        }
    }

    fn unbind(&mut self) {
        self.bound = None;
        self.state = SessionState::Unbound;
        self.epoch += 1;
    }
}

/// What happened to the binding since a given epoch.
enum BindingChange {
    Unchanged,
    Unbound,
    Moved { endpoint: Endpoint, epoch: u64 },
}

/// A resilient client session against a discovered server.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct ConnectionSession {
    /// Session state. Never held across an `.await`.
    inner: Mutex<SessionInner>,
    /// Serializes discovery and recovery so only one rescan runs at a time.
    rebinding: Mutex<()>,
    scanner: PortScanner,
    http: HttpClient,
    retry: RetryPolicy,
}

impl ConnectionSession {
    /// Create an unbound session.
    ///
    /// `scan_config` is used by [`discover`](Self::discover) and by
    /// recovery until a later discovery replaces it.
    pub fn new(
        scanner: PortScanner,
        scan_config: ScanConfig,
        retry: RetryPolicy,
        timeouts: RequestTimeouts,
    ) -> Result<Self, SessionError> {
        scan_config.validate()?;
        retry.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .no_proxy()
            .build()
            .map_err(|e| SessionError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Unbound,
                bound: None,
                last_good: None,
                scan_config,
                epoch: 0,
            }),
            rebinding: Mutex::new(()),
            scanner,
            http,
            retry,
        })
    }

    /// Create an unbound session probing over HTTP with `config`'s settings.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SessionError> {
        let checker = HttpLivenessChecker::new(config.liveness.clone())?;
        let scanner = PortScanner::new(Arc::new(checker) as Arc<dyn LivenessChecker>);
        Self::new(scanner, config.scan.clone(), config.retry, config.timeouts)
    }

    // ─── Introspection ───────────────────────────────────────────────────

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn bound_endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().await.bound.clone()
    }

    pub async fn last_known_good(&self) -> Option<Endpoint> {
        self.inner.lock().await.last_good.clone()
    }

    pub async fn scan_config(&self) -> ScanConfig {
        self.inner.lock().await.scan_config.clone()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    // ─── Binding ─────────────────────────────────────────────────────────

    /// Bind to `endpoint` without checking it. The caller is expected to
    /// have scanned first.
    ///
    /// Port 0 can never host a server and is rejected.
    pub async fn bind(&self, endpoint: Endpoint) -> Result<(), SessionError> {
        check_port(&endpoint)?;
        let mut inner = self.inner.lock().await;
        tracing::info!(endpoint = %endpoint, previous = ?inner.bound, "session bound");
        inner.bind(endpoint);
        Ok(())
    }

    /// Bind to `endpoint` only if it passes a liveness check.
    pub async fn bind_verified(&self, endpoint: Endpoint) -> Result<(), SessionError> {
        check_port(&endpoint)?;
        let timeout = self.inner.lock().await.scan_config.per_probe_timeout;
        let probe = self.scanner.check(&endpoint, timeout).await;
        if !probe.is_alive() {
            return Err(SessionError::EndpointNotAlive {
                endpoint,
                outcome: probe.outcome,
            });
        }
        tracing::info!(endpoint = %endpoint, "session bound (verified)");
        let mut inner = self.inner.lock().await;
        inner.last_good = Some(endpoint.clone());
        inner.bind(endpoint);
        Ok(())
    }

    /// Drop the bound endpoint. Calling it on an unbound session is a no-op.
    ///
    /// A recovery in progress notices at its next step and gives up with
    /// `NotBound`.
    pub async fn unbind(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Unbound {
            tracing::info!(endpoint = ?inner.bound, "session unbound");
        }
        inner.unbind();
    }

    /// Discover a server with the session's current scan config and bind it.
    pub async fn discover(&self) -> Result<Endpoint, SessionError> {
        let _rebinding = self.rebinding.lock().await;
        let config = self.inner.lock().await.scan_config.clone();
        self.discover_gated(config).await
    }

    /// Discover with `config`, which becomes the session's scan config for
    /// later recovery.
    pub async fn discover_with(&self, config: ScanConfig) -> Result<Endpoint, SessionError> {
        config.validate()?;
        let _rebinding = self.rebinding.lock().await;
        self.inner.lock().await.scan_config = config.clone();
        self.discover_gated(config).await
    }

    async fn discover_gated(&self, config: ScanConfig) -> Result<Endpoint, SessionError> {
        // Fast path: the server usually is where it was last time.
        let previous = self.inner.lock().await.last_good.clone();
        if let Some(previous) = previous {
            let probe = self
                .scanner
                .check(&previous, config.per_probe_timeout)
                .await;
            if probe.is_alive() {
                tracing::info!(endpoint = %previous, "reusing last known good endpoint");
                self.inner.lock().await.confirm(previous.clone());
                return Ok(previous);
            }
            tracing::debug!(endpoint = %previous, outcome = %probe.outcome, "last known good endpoint is gone");
        }

        match self.scanner.scan(&config).await {
            Ok(found) => {
                self.inner.lock().await.confirm(found.clone());
                Ok(found)
            }
            Err(e) => {
                self.inner.lock().await.unbind();
                Err(e.into())
            }
        }
    }

    /// Probe the bound endpoint once. An unbound session is never healthy.
    pub async fn health_check(&self) -> bool {
        let (endpoint, timeout) = {
            let inner = self.inner.lock().await;
            match &inner.bound {
                Some(endpoint) => (endpoint.clone(), inner.scan_config.per_probe_timeout),
                None => return false,
            }
        };
        let probe = self.scanner.check(&endpoint, timeout).await;
        tracing::debug!(endpoint = %endpoint, outcome = %probe.outcome, "health check");
        probe.is_alive()
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Issue `call` against the bound endpoint, self-healing on network
    /// failure.
    ///
    /// Non-2xx statuses and unparseable bodies are returned as-is; only
    /// network-level failures trigger the retry policy.
    pub async fn request(&self, call: &ApiCall) -> Result<Value, SessionError> {
        let (endpoint, epoch) = {
            let inner = self.inner.lock().await;
            match (&inner.state, &inner.bound) {
                (SessionState::Unbound, _) | (_, None) => return Err(SessionError::NotBound),
                (_, Some(endpoint)) => (endpoint.clone(), inner.epoch),
            }
        };

        match self.send(&endpoint, call).await {
            Ok(value) => {
                self.mark_alive(&endpoint).await;
                Ok(value)
            }
            Err(e) if e.is_transient() => self.recover(endpoint, epoch, call, e).await,
            Err(e) => {
                if matches!(e, SessionError::Http { .. }) {
                    self.mark_alive(&endpoint).await;
                }
                Err(e)
            }
        }
    }

    /// Record that `endpoint` just answered, if it is still the bound one.
    async fn mark_alive(&self, endpoint: &Endpoint) {
        let mut inner = self.inner.lock().await;
        if inner.bound.as_ref() == Some(endpoint) {
            inner.confirm(endpoint.clone());
        }
    }

    /// Confirm `endpoint` unless the binding was changed from outside since
    /// `epoch`.
    async fn confirm_since(&self, epoch: u64, endpoint: &Endpoint) {
        let mut inner = self.inner.lock().await;
        inner.last_good = Some(endpoint.clone());
        if inner.epoch == epoch || inner.bound.as_ref() == Some(endpoint) {
            inner.confirm(endpoint.clone());
        }
    }

    async fn binding_since(&self, epoch: u64) -> BindingChange {
        let inner = self.inner.lock().await;
        if inner.epoch == epoch {
            return BindingChange::Unchanged;
        }
        match &inner.bound {
            None => BindingChange::Unbound,
            Some(endpoint) => BindingChange::Moved {
                endpoint: endpoint.clone(),
                epoch: inner.epoch,
            },
        }
    }

    async fn recover(
        &self,
        failed: Endpoint,
        seen_epoch: u64,
        call: &ApiCall,
        cause: SessionError,
    ) -> Result<Value, SessionError> {
        let _rebinding = self.rebinding.lock().await;
        let mut endpoint = failed;

        // Another caller may have recovered, or the binding may have been
        // changed, while this one waited for its turn.
        match self.binding_since(seen_epoch).await {
            BindingChange::Unchanged => {}
            BindingChange::Unbound => return Err(SessionError::NotBound),
            BindingChange::Moved { endpoint: current, .. } => {
                tracing::debug!(from = %endpoint, to = %current, "session already recovered, replaying");
                match self.send(&current, call).await {
                    Ok(value) => {
                        self.mark_alive(&current).await;
                        return Ok(value);
                    }
                    Err(e) if e.is_transient() => {}
                    Err(e) => {
                        if matches!(e, SessionError::Http { .. }) {
                            self.mark_alive(&current).await;
                        }
                        return Err(e);
                    }
                }
            }
        }

        let (mut epoch, scan_config) = {
            let mut inner = self.inner.lock().await;
            match &inner.bound {
                None => return Err(SessionError::NotBound),
                Some(current) => endpoint = current.clone(),
            }
            inner.state = SessionState::Degraded;
            (inner.epoch, inner.scan_config.clone())
        };
        tracing::warn!(
            endpoint = %endpoint,
            error = %cause,
            max_attempts = self.retry.max_attempts,
            "request failed, session degraded"
        );

        for attempt in 0..self.retry.max_attempts {
            let delay = self.retry.backoff(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
            tokio::time::sleep(delay).await;

            match self.binding_since(epoch).await {
                BindingChange::Unchanged => {}
                BindingChange::Unbound => {
                    tracing::info!(endpoint = %endpoint, "session unbound during recovery");
                    return Err(SessionError::NotBound);
                }
                BindingChange::Moved {
                    endpoint: current,
                    epoch: current_epoch,
                } => {
                    endpoint = current;
                    epoch = current_epoch;
                }
            }

            let probe = self
                .scanner
                .check(&endpoint, scan_config.per_probe_timeout)
                .await;
            if !probe.is_alive() {
                tracing::info!(
                    endpoint = %endpoint,
                    outcome = %probe.outcome,
                    attempt,
                    "endpoint no longer alive, rescanning"
                );
                match self.scanner.scan(&scan_config).await {
                    Ok(found) => {
                        let mut inner = self.inner.lock().await;
                        if inner.epoch != epoch && inner.bound.is_none() {
                            return Err(SessionError::NotBound);
                        }
                        if found != endpoint {
                            tracing::info!(from = %endpoint, to = %found, "session rebound");
                        }
                        inner.bound = Some(found.clone());
                        inner.state = SessionState::Degraded;
                        inner.epoch += 1;
                        epoch = inner.epoch;
                        endpoint = found;
                    }
                    Err(DiscoveryError::NotFound { .. }) => continue,
                    Err(e) => {
                        let mut inner = self.inner.lock().await;
                        if inner.epoch == epoch {
                            inner.unbind();
                        }
                        return Err(e.into());
                    }
                }
            }

            match self.send(&endpoint, call).await {
                Ok(value) => {
                    tracing::info!(endpoint = %endpoint, attempt, "session recovered");
                    self.confirm_since(epoch, &endpoint).await;
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(endpoint = %endpoint, attempt, error = %e, "retry failed");
                }
                Err(e) => {
                    // It answered, so it is alive even if it said no.
                    if matches!(e, SessionError::Http { .. }) {
                        self.confirm_since(epoch, &endpoint).await;
                    }
                    return Err(e);
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.epoch == epoch {
                inner.unbind();
            }
        }
        tracing::warn!(
            endpoint = %endpoint,
            attempts = self.retry.max_attempts,
            "connection lost, session unbound"
        );
        Err(SessionError::ConnectionLost {
            endpoint,
            attempts: self.retry.max_attempts,
        })
    }

    /// One attempt of `call` against `endpoint`, no retries.
    async fn send(&self, endpoint: &Endpoint, call: &ApiCall) -> Result<Value, SessionError> {
        let url = endpoint.url(&call.path);
        tracing::debug!(method = ?call.method, url = %url, "sending request");

        let builder = match call.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Delete => self.http.delete(&url),
        };
        let builder = match &call.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                SessionError::MalformedPayload {
                    reason: format!("failed to build request: {e}"),
                }
            } else {
                SessionError::Transport {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| SessionError::Transport {
            endpoint: endpoint.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(SessionError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| SessionError::MalformedPayload {
            reason: format!("response from {url} is not valid JSON: {e}"),
        })
    }
}

/// Reject endpoints outside the usable port range `[1, 65535]`.
fn check_port(endpoint: &Endpoint) -> Result<(), SessionError> {
    if endpoint.port() == 0 {
        return Err(SessionError::InvalidConfig {
            reason: format!("cannot bind {endpoint}: port must be in [1, 65535]"),
        });
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fake::ScriptedChecker;
    use crate::discovery::LivenessContract;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Two adjacent ports: the first closed, the second held by a listener
    /// that a mock server can take over later.
    fn adjacent_ports() -> (u16, std::net::TcpListener) {
        for _ in 0..100 {
            let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = first.local_addr().unwrap().port();
            if port == u16::MAX {
                continue;
            }
            if let Ok(second) = std::net::TcpListener::bind(("127.0.0.1", port + 1)) {
                drop(first);
                return (port, second);
            }
        }
        panic!("could not reserve two adjacent ports");
    }

    fn endpoint_of(server: &MockServer) -> Endpoint {
        let addr = server.address();
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    async fn models_server() -> MockServer {
        let server = MockServer::start().await;
        mount_models(&server).await;
        server
    }

    async fn mount_models(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": [{"id": "Qwen3-0.6B-GGUF"}]})),
            )
            .mount(server)
            .await;
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(50), 2.0)
    }

    fn scan_config(port: u16) -> ScanConfig {
        ScanConfig::default()
            .with_hosts(["127.0.0.1"])
            .with_port_range(port, port)
            .with_per_probe_timeout(Duration::from_millis(300))
            .with_total_scan_timeout(Duration::from_secs(2))
    }

    fn session_with(checker: Arc<dyn LivenessChecker>, config: ScanConfig) -> ConnectionSession {
        ConnectionSession::new(
            PortScanner::new(checker),
            config,
            fast_retry(),
            RequestTimeouts {
                connect: Duration::from_millis(500),
                request: Duration::from_secs(2),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_on_unbound_session_fails() {
        let session = session_with(Arc::new(ScriptedChecker::new()), scan_config(8000));
        let err = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotBound));
        assert_eq!(session.state().await, SessionState::Unbound);
    }

    #[tokio::test]
    async fn test_bind_and_request() {
        let server = models_server().await;
        let endpoint = endpoint_of(&server);
        let session = session_with(Arc::new(ScriptedChecker::new()), scan_config(endpoint.port()));

        session.bind(endpoint.clone()).await.unwrap();
        let body = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap();

        assert_eq!(body["data"][0]["id"], "Qwen3-0.6B-GGUF");
        assert_eq!(session.state().await, SessionState::Bound);
        assert_eq!(session.last_known_good().await, Some(endpoint));
    }

    #[tokio::test]
    async fn test_unbind_is_idempotent() {
        let session = session_with(Arc::new(ScriptedChecker::new()), scan_config(8000));
        session.unbind().await;
        session.unbind().await;
        assert_eq!(session.state().await, SessionState::Unbound);

        session.bind(Endpoint::new("127.0.0.1", 8000)).await.unwrap();
        session.unbind().await;
        session.unbind().await;
        assert_eq!(session.state().await, SessionState::Unbound);
        assert!(session.bound_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_lost_after_exact_retries() {
        let dead = Endpoint::new("127.0.0.1", closed_port());
        let checker = Arc::new(ScriptedChecker::new());
        // Rescans look somewhere else entirely and find nothing.
        let rescan = ScanConfig::default()
            .with_hosts(["192.0.2.1"])
            .with_port_range(8000, 8001);
        let session = session_with(Arc::clone(&checker) as Arc<dyn LivenessChecker>, rescan);
        session.bind(dead.clone()).await.unwrap();

        let started = Instant::now();
        let err = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match err {
            SessionError::ConnectionLost { endpoint, attempts } => {
                assert_eq!(endpoint, dead);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected ConnectionLost, got {other:?}"),
        }
        // One liveness re-check per retry.
        assert_eq!(checker.probe_count(&dead), 2);
        // Backoff of 50ms then 100ms.
        assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
        assert_eq!(session.state().await, SessionState::Unbound);
        assert!(session.bound_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_attempts_fails_immediately() {
        let dead = Endpoint::new("127.0.0.1", closed_port());
        let checker = Arc::new(ScriptedChecker::new());
        let session = ConnectionSession::new(
            PortScanner::new(Arc::clone(&checker) as Arc<dyn LivenessChecker>),
            scan_config(dead.port()),
            RetryPolicy::no_retry(),
            RequestTimeouts::default(),
        )
        .unwrap();
        session.bind(dead.clone()).await.unwrap();

        let err = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionLost { attempts: 0, .. }));
        assert!(checker.probed().is_empty());
        assert_eq!(session.state().await, SessionState::Unbound);
    }

    #[tokio::test]
    async fn test_self_heal_rebinds_to_new_endpoint() {
        let server = models_server().await;
        let live = endpoint_of(&server);
        let dead = Endpoint::new("127.0.0.1", closed_port());

        let checker = Arc::new(ScriptedChecker::new().with_alive(live.clone()));
        let session = session_with(
            Arc::clone(&checker) as Arc<dyn LivenessChecker>,
            scan_config(live.port()),
        );
        session.bind(dead.clone()).await.unwrap();

        let body = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap();

        assert_eq!(body["data"][0]["id"], "Qwen3-0.6B-GGUF");
        assert_eq!(session.bound_endpoint().await, Some(live.clone()));
        assert_eq!(session.state().await, SessionState::Bound);
        assert_eq!(session.last_known_good().await, Some(live));
        assert_eq!(checker.probe_count(&dead), 1);
    }

    #[tokio::test]
    async fn test_self_heal_over_http_after_port_change() {
        // The server "restarted" one port up from where the session was bound.
        let (old_port, reserved) = adjacent_ports();
        let server = MockServer::builder().listener(reserved).start().await;
        mount_models(&server).await;

        let checker = HttpLivenessChecker::new(LivenessContract::default()).unwrap();
        let config = scan_config(old_port).with_port_range(old_port, old_port + 1);
        let session = session_with(Arc::new(checker), config);
        session.bind(Endpoint::new("127.0.0.1", old_port)).await.unwrap();

        let body = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap();

        assert!(body["data"].is_array());
        assert_eq!(
            session.bound_endpoint().await,
            Some(Endpoint::new("127.0.0.1", old_port + 1))
        );
        assert_eq!(session.state().await, SessionState::Bound);
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/load_model"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not found"))
            .mount(&server)
            .await;
        let endpoint = endpoint_of(&server);

        let checker = Arc::new(ScriptedChecker::new());
        let session = session_with(
            Arc::clone(&checker) as Arc<dyn LivenessChecker>,
            scan_config(endpoint.port()),
        );
        session.bind(endpoint).await.unwrap();

        let err = session
            .request(&ApiCall::post(
                "/api/v1/load_model",
                serde_json::json!({"model": "missing"}),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Http { status: 500, .. }));
        assert_eq!(err.error_body(), Some("model not found"));
        assert!(checker.probed().is_empty());
        assert_eq!(session.state().await, SessionState::Bound);
    }

    #[tokio::test]
    async fn test_non_json_response_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not an api</html>"))
            .mount(&server)
            .await;
        let endpoint = endpoint_of(&server);

        let checker = Arc::new(ScriptedChecker::new());
        let session = session_with(
            Arc::clone(&checker) as Arc<dyn LivenessChecker>,
            scan_config(endpoint.port()),
        );
        session.bind(endpoint).await.unwrap();

        let err = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedPayload { .. }));
        assert!(checker.probed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/unload_model"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let endpoint = endpoint_of(&server);
        let session = session_with(Arc::new(ScriptedChecker::new()), scan_config(endpoint.port()));
        session.bind(endpoint).await.unwrap();

        let body = session
            .request(&ApiCall::post("/api/v1/unload_model", serde_json::json!({})))
            .await
            .unwrap();
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_discover_binds_and_reuses_last_good() {
        let live = Endpoint::new("127.0.0.1", 8003);
        let checker = Arc::new(ScriptedChecker::new().with_alive(live.clone()));
        let config = ScanConfig::default()
            .with_hosts(["127.0.0.1"])
            .with_port_range(8000, 8005)
            .with_concurrency(1);
        let session = session_with(Arc::clone(&checker) as Arc<dyn LivenessChecker>, config);

        let found = session.discover().await.unwrap();
        assert_eq!(found, live);
        assert_eq!(session.state().await, SessionState::Bound);
        assert_eq!(checker.probed().len(), 4);

        session.unbind().await;
        let found = session.discover().await.unwrap();
        assert_eq!(found, live);
        // Only the fast-path re-check, no second scan.
        assert_eq!(checker.probed().len(), 5);
    }

    #[tokio::test]
    async fn test_discover_with_records_config() {
        let live = Endpoint::new("localhost", 8100);
        let checker = Arc::new(ScriptedChecker::new().with_alive(live.clone()));
        let session = session_with(checker, scan_config(8000));

        let config = ScanConfig::default()
            .with_hosts(["localhost"])
            .with_port_range(8100, 8100);
        let found = session.discover_with(config.clone()).await.unwrap();
        assert_eq!(found, live);
        assert_eq!(session.scan_config().await, config);
    }

    #[tokio::test]
    async fn test_discover_not_found_leaves_session_unbound() {
        let checker = Arc::new(ScriptedChecker::new());
        let session = session_with(checker, scan_config(8000));
        session.bind(Endpoint::new("127.0.0.1", 8000)).await.unwrap();

        let err = session.discover().await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
        assert_eq!(session.state().await, SessionState::Unbound);
    }

    #[tokio::test]
    async fn test_bind_verified() {
        let live = Endpoint::new("127.0.0.1", 8000);
        let dead = Endpoint::new("127.0.0.1", 8001);
        let checker = Arc::new(ScriptedChecker::new().with_alive(live.clone()));
        let session = session_with(checker, scan_config(8000));

        let err = session.bind_verified(dead.clone()).await.unwrap_err();
        assert!(matches!(err, SessionError::EndpointNotAlive { .. }));
        assert_eq!(session.state().await, SessionState::Unbound);

        session.bind_verified(live.clone()).await.unwrap();
        assert_eq!(session.bound_endpoint().await, Some(live.clone()));
        assert_eq!(session.last_known_good().await, Some(live));
    }

    #[tokio::test]
    async fn test_invalid_retry_policy_is_rejected() {
        let result = ConnectionSession::new(
            PortScanner::new(Arc::new(ScriptedChecker::new())),
            scan_config(8000),
            RetryPolicy::new(1, Duration::from_millis(10), 0.5),
            RequestTimeouts::default(),
        );
        assert!(matches!(result, Err(SessionError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_session() {
        let server = models_server().await;
        let endpoint = endpoint_of(&server);
        let session = Arc::new(session_with(
            Arc::new(ScriptedChecker::new()),
            scan_config(endpoint.port()),
        ));
        session.bind(endpoint).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            tasks.spawn(async move { session.request(&ApiCall::get("/api/v1/models")).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_ok());
        }
        assert_eq!(session.state().await, SessionState::Bound);
    }

    /// Timeouts short enough that a request to a dead port fails within a
    /// millisecond even when the tokio clock is paused.
    fn tight_timeouts() -> RequestTimeouts {
        RequestTimeouts {
            connect: Duration::from_millis(1),
            request: Duration::from_millis(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_degraded_during_recovery() {
        let dead = Endpoint::new("127.0.0.1", closed_port());
        let session = Arc::new(
            ConnectionSession::new(
                PortScanner::new(Arc::new(ScriptedChecker::new())),
                scan_config(dead.port()),
                RetryPolicy::new(2, Duration::from_secs(3), 2.0),
                tight_timeouts(),
            )
            .unwrap(),
        );
        session.bind(dead.clone()).await.unwrap();

        let pending = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.request(&ApiCall::get("/api/v1/models")).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = tokio::time::timeout(Duration::from_secs(1), session.state())
            .await
            .unwrap();
        assert_eq!(state, SessionState::Degraded);
        assert_eq!(session.bound_endpoint().await, Some(dead));

        // Unbinding does not wait for the recovery and ends it.
        tokio::time::timeout(Duration::from_secs(1), session.unbind())
            .await
            .unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::NotBound));
        assert_eq!(session.state().await, SessionState::Unbound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_spacing() {
        let dead = Endpoint::new("127.0.0.1", closed_port());
        let checker = Arc::new(ScriptedChecker::new());
        let rescan = ScanConfig::default()
            .with_hosts(["192.0.2.1"])
            .with_port_range(8000, 8000);
        let session = ConnectionSession::new(
            PortScanner::new(Arc::clone(&checker) as Arc<dyn LivenessChecker>),
            rescan,
            fast_retry(),
            tight_timeouts(),
        )
        .unwrap();
        session.bind(dead.clone()).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = session
            .request(&ApiCall::get("/api/v1/models"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionLost { attempts: 2, .. }));

        let times = checker.probe_times(&dead);
        assert_eq!(times.len(), 2);
        let slack = Duration::from_millis(10);
        let first = times[0] - started;
        let second = times[1] - times[0];
        assert!(
            first >= Duration::from_millis(50) && first <= Duration::from_millis(50) + slack,
            "first re-check after {first:?}"
        );
        assert!(
            second >= Duration::from_millis(100) && second <= Duration::from_millis(100) + slack,
            "second re-check after {second:?}"
        );
    }

    #[tokio::test]
    async fn test_concurrent_failures_recover_once() {
        let port = closed_port();
        let endpoint = Endpoint::new("127.0.0.1", port);
        // The server comes back on the same port, so the re-check passes.
        let checker = Arc::new(ScriptedChecker::new().with_alive(endpoint.clone()));
        let session = Arc::new(
            ConnectionSession::new(
                PortScanner::new(Arc::clone(&checker) as Arc<dyn LivenessChecker>),
                scan_config(port),
                RetryPolicy::new(2, Duration::from_millis(300), 2.0),
                RequestTimeouts {
                    connect: Duration::from_millis(500),
                    request: Duration::from_secs(2),
                },
            )
            .unwrap(),
        );
        session.bind(endpoint.clone()).await.unwrap();

        let started = Instant::now();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..2 {
            let session = Arc::clone(&session);
            tasks.spawn(async move { session.request(&ApiCall::get("/api/v1/models")).await });
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let listener = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
        let server = MockServer::builder().listener(listener).start().await;
        mount_models(&server).await;

        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_ok());
        }
        // One caller recovered; the other replayed without its own backoff.
        assert_eq!(checker.probe_count(&endpoint), 1);
        assert!(started.elapsed() < Duration::from_millis(550));
        assert_eq!(session.state().await, SessionState::Bound);
    }

    #[tokio::test]
    async fn test_discover_rescans_when_last_good_goes_down() {
        let first = Endpoint::new("127.0.0.1", 8003);
        let second = Endpoint::new("127.0.0.1", 8004);
        let checker = Arc::new(ScriptedChecker::new().with_alive(first.clone()));
        let config = ScanConfig::default()
            .with_hosts(["127.0.0.1"])
            .with_port_range(8000, 8005)
            .with_concurrency(1);
        let session = session_with(Arc::clone(&checker) as Arc<dyn LivenessChecker>, config);

        assert_eq!(session.discover().await.unwrap(), first);

        checker.set_alive(&first, false);
        checker.set_alive(&second, true);

        assert_eq!(session.discover().await.unwrap(), second);
        assert_eq!(session.last_known_good().await, Some(second));
        assert_eq!(checker.probe_count(&first), 3);
    }

    #[tokio::test]
    async fn test_bind_rejects_port_zero() {
        let session = session_with(Arc::new(ScriptedChecker::new()), scan_config(8000));
        let zero = Endpoint::new("127.0.0.1", 0);

        let err = session.bind(zero.clone()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig { .. }));
        let err = session.bind_verified(zero).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig { .. }));
        assert_eq!(session.state().await, SessionState::Unbound);
    }
}
