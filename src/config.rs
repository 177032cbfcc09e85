//! Client configuration.
//!
//! Loaded from a YAML file (`lemonade.yaml`) with `${VAR}` and
//! `${VAR:-default}` interpolation. Every key is optional; durations are
//! written in milliseconds.
//!
//! ```yaml
//! scan:
//!   host_candidates: ["127.0.0.1", "localhost"]
//!   port_range: { start: 8000, end: 9000 }
//!   per_probe_timeout_ms: 500
//!   total_scan_timeout_ms: 10000
//!   concurrency: 32
//! liveness:
//!   path: /api/v1/models
//!   marker: data
//! retry:
//!   max_attempts: 3
//!   backoff_base_ms: 1000
//!   backoff_multiplier: 2.0
//! connect_timeout_ms: 5000
//! request_timeout_ms: 30000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::discovery::{LivenessContract, PortRange, ScanConfig};
use crate::session::{RequestTimeouts, RetryPolicy};

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "lemonade.yaml";

/// Env var holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "LEMONADE_CLIENT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found: {reason}")]
    NotFound { reason: String },

    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── ClientConfig ────────────────────────────────────────────────────────────

/// Everything needed to build a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub scan: ScanConfig,
    pub liveness: LivenessContract,
    pub retry: RetryPolicy,
    pub timeouts: RequestTimeouts,
}

impl ClientConfig {
    /// Parse a YAML document, after env-var interpolation.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        // An empty document means "all defaults".
        let file: ConfigFile = if interpolated.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?
        };

        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid { reason };

        self.scan.validate().map_err(|e| invalid(e.to_string()))?;
        self.liveness.validate().map_err(|e| invalid(e.to_string()))?;
        self.retry.validate().map_err(|e| invalid(e.to_string()))?;
        if self.timeouts.connect.is_zero() || self.timeouts.request.is_zero() {
            return Err(invalid("request timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

// ─── File format ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    scan: ScanSection,
    liveness: LivenessContract,
    retry: RetrySection,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ScanSection {
    host_candidates: Option<Vec<String>>,
    port_range: Option<PortRange>,
    per_probe_timeout_ms: Option<u64>,
    total_scan_timeout_ms: Option<u64>,
    concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
}

impl ConfigFile {
    fn into_config(self) -> ClientConfig {
        let mut scan = ScanConfig::default();
        let s = self.scan;
        if let Some(hosts) = s.host_candidates {
            scan.host_candidates = hosts;
        }
        if let Some(range) = s.port_range {
            scan.port_range = range;
        }
        if let Some(ms) = s.per_probe_timeout_ms {
            scan.per_probe_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = s.total_scan_timeout_ms {
            scan.total_scan_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = s.concurrency {
            scan.concurrency = n;
        }

        let mut retry = RetryPolicy::default();
        let r = self.retry;
        if let Some(n) = r.max_attempts {
            retry.max_attempts = n;
        }
        if let Some(ms) = r.backoff_base_ms {
            retry.backoff_base = Duration::from_millis(ms);
        }
        if let Some(m) = r.backoff_multiplier {
            retry.backoff_multiplier = m;
        }

        let mut timeouts = RequestTimeouts::default();
        if let Some(ms) = self.connect_timeout_ms {
            timeouts.connect = Duration::from_millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            timeouts.request = Duration::from_millis(ms);
        }

        ClientConfig {
            scan,
            liveness: self.liveness,
            retry,
            timeouts,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `LEMONADE_CLIENT_CONFIG` wins when set. Otherwise searches upward from
/// `start` for `lemonade.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var(CONFIG_PATH_ENV).ok();
    find_config_path_with(start, from_env.as_deref())
}

fn find_config_path_with(start: &Path, explicit: Option<&str>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        let candidate = PathBuf::from(expand_home(path));
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(ConfigError::NotFound {
            reason: format!("{CONFIG_PATH_ENV} points to missing file {}", candidate.display()),
        });
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        reason: format!("no {CONFIG_FILE_NAME} in {} or its parents", start.display()),
    })
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let config = ClientConfig::from_yaml_str(&raw)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load the config found from `start`, or the defaults when there is none.
///
/// A file that exists but fails to read, parse or validate is still an
/// error.
pub fn load_or_default(start: &Path) -> Result<ClientConfig, ConfigError> {
    match find_config_path(start) {
        Ok(path) => load_config(&path),
        Err(ConfigError::NotFound { reason }) => {
            tracing::debug!(reason = %reason, "no config file, using defaults");
            Ok(ClientConfig::default())
        }
        Err(e) => Err(e),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string. An unterminated
/// `${` is left as written.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let body = &rest[open + 2..];
        let Some(close) = body.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        out.push_str(&lookup_var(&body[..close]));
        rest = &body[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Value of `NAME`, or of `NAME:-default` with the default home-expanded.
fn lookup_var(expr: &str) -> String {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expr, None),
    };
    match (std::env::var(name.trim()), default) {
        (Ok(value), _) => value,
        (Err(_), Some(default)) => expand_home(default),
        (Err(_), None) => String::new(),
    }
}

/// Expand `~` or a leading `~/` to the home directory. `~user` forms are
/// left alone.
fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{rest}", home.display()),
        None => path.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
