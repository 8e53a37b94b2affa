//! Client configuration.
//!
//! `Settings` is the raw, partially-filled form: every key is optional and
//! can come from code or from a TOML file. `Settings::resolve` fills the
//! gaps from the environment and then from defaults, validates the result,
//! and produces a `ClientConfig`.
//!
//! Precedence for every key: explicit value > environment variable > default.
//!
//! Example TOML:
//! ```toml
//! api_key = "tgk_live_..."
//! base_url = "https://api.tollgate.dev/api/v1"
//! enforcement = "block"
//! refresh_interval = 30.0
//! exclude_patterns = ['localhost:\d+']
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::enforcement::EnforcementMode;
use crate::error::{TollgateError, TollgateResult};

pub const ENV_API_KEY: &str = "TOLLGATE_API_KEY";
pub const ENV_API_URL: &str = "TOLLGATE_API_URL";
pub const ENV_ENFORCEMENT: &str = "TOLLGATE_ENFORCEMENT";
pub const ENV_AUTO_REGISTER: &str = "TOLLGATE_AUTO_REGISTER";
pub const ENV_AGENT_NAME: &str = "TOLLGATE_AGENT_NAME";
pub const ENV_AGENT_TYPE: &str = "TOLLGATE_AGENT_TYPE";
pub const ENV_ENVIRONMENT: &str = "TOLLGATE_ENVIRONMENT";
pub const ENV_HEARTBEAT_INTERVAL: &str = "TOLLGATE_HEARTBEAT_INTERVAL";

pub const DEFAULT_BASE_URL: &str = "https://api.tollgate.dev/api/v1";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STALE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Required prefix on every API key.
pub const API_KEY_PREFIX: &str = "tgk_";

/// SDK name reported in the user agent and in fleet registration.
pub const SDK_NAME: &str = "tollgate-sdk-rust";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The fixed user-agent header value sent on every request.
pub fn user_agent() -> String {
    format!("{}/{}", SDK_NAME, SDK_VERSION)
}

/// Raw configuration as supplied by code or a TOML file.
///
/// Interval fields are seconds and may be fractional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub flush_interval: Option<f64>,
    pub batch_size: Option<usize>,
    pub timeout: Option<f64>,
    pub refresh_interval: Option<f64>,
    pub stale_ttl: Option<f64>,
    pub heartbeat_interval: Option<f64>,
    pub enforcement: Option<String>,
    pub exclude_patterns: Option<Vec<String>>,
    pub auto_register: Option<bool>,
    pub agent_name: Option<String>,
    pub agent_type: Option<String>,
    pub environment: Option<String>,
}

/// Fully resolved and validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_key: String,
    /// Always without a trailing `/`.
    pub base_url: String,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub timeout: Duration,
    pub refresh_interval: Duration,
    pub stale_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub enforcement: EnforcementMode,
    pub exclude_patterns: Vec<String>,
    pub auto_register: bool,
    pub agent_name: String,
    pub agent_type: Option<String>,
    pub environment: Option<String>,
}

impl Settings {
    /// Parse `s` as TOML.
    ///
    /// Returns `TollgateError::Config` if the TOML is malformed or contains
    /// unknown keys.
    pub fn from_toml_str(s: &str) -> TollgateResult<Self> {
        toml::from_str(s)
            .map_err(|e| TollgateError::config(format!("failed to parse settings TOML: {}", e)))
    }

    /// Read the file at `path` and parse it as TOML settings.
    pub fn from_file(path: &Path) -> TollgateResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TollgateError::config(format!(
                "failed to read settings file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Settings carrying only an API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Resolve against the real process environment.
    pub fn resolve_from_process_env(&self) -> TollgateResult<ClientConfig> {
        self.resolve(|key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    ///
    /// Empty environment values are treated as unset.
    pub fn resolve<F>(&self, env: F) -> TollgateResult<ClientConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = self
            .api_key
            .clone()
            .or_else(|| env(ENV_API_KEY))
            .ok_or_else(|| {
                TollgateError::config(format!("API key not provided and {} is unset", ENV_API_KEY))
            })?;
        validate_api_key(&api_key)?;

        let base_url = self
            .base_url
            .clone()
            .or_else(|| env(ENV_API_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = validate_base_url(&base_url)?;

        let enforcement = match self.enforcement.clone().or_else(|| env(ENV_ENFORCEMENT)) {
            Some(raw) => raw.parse()?,
            None => EnforcementMode::default(),
        };

        let auto_register = match self.auto_register {
            Some(explicit) => explicit,
            None => match env(ENV_AUTO_REGISTER) {
                Some(raw) => parse_flag(ENV_AUTO_REGISTER, &raw)?,
                None => false,
            },
        };

        let heartbeat_interval = match self.heartbeat_interval {
            Some(secs) => interval("heartbeat_interval", secs)?,
            None => match env(ENV_HEARTBEAT_INTERVAL) {
                Some(raw) => {
                    let secs: f64 = raw.trim().parse().map_err(|_| {
                        TollgateError::config(format!(
                            "{} must be a number of seconds, got '{}'",
                            ENV_HEARTBEAT_INTERVAL, raw
                        ))
                    })?;
                    interval(ENV_HEARTBEAT_INTERVAL, secs)?
                }
                None => DEFAULT_HEARTBEAT_INTERVAL,
            },
        };

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(TollgateError::config("batch_size must be at least 1"));
        }

        Ok(ClientConfig {
            api_key,
            base_url,
            flush_interval: optional_interval("flush_interval", self.flush_interval, DEFAULT_FLUSH_INTERVAL)?,
            batch_size,
            timeout: optional_seconds("timeout", self.timeout, DEFAULT_TIMEOUT)?,
            refresh_interval: optional_interval(
                "refresh_interval",
                self.refresh_interval,
                DEFAULT_REFRESH_INTERVAL,
            )?,
            stale_ttl: optional_seconds("stale_ttl", self.stale_ttl, DEFAULT_STALE_TTL)?,
            heartbeat_interval,
            enforcement,
            exclude_patterns: self.exclude_patterns.clone().unwrap_or_default(),
            auto_register,
            agent_name: self
                .agent_name
                .clone()
                .or_else(|| env(ENV_AGENT_NAME))
                .unwrap_or_else(local_hostname),
            agent_type: self.agent_type.clone().or_else(|| env(ENV_AGENT_TYPE)),
            environment: self.environment.clone().or_else(|| env(ENV_ENVIRONMENT)),
        })
    }
}

impl ClientConfig {
    /// Defaults for everything except the key; the environment is ignored.
    pub fn for_api_key(api_key: impl Into<String>) -> TollgateResult<Self> {
        Settings::with_api_key(api_key).resolve(|_| None)
    }
}

/// Reject credentials that cannot possibly authenticate.
pub fn validate_api_key(key: &str) -> TollgateResult<()> {
    if !key.starts_with(API_KEY_PREFIX) || key.len() == API_KEY_PREFIX.len() {
        return Err(TollgateError::config(format!(
            "API key must start with '{}' followed by the key body",
            API_KEY_PREFIX
        )));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(TollgateError::config(
            "API key contains whitespace or non-printable characters",
        ));
    }
    Ok(())
}

/// Check the scheme and strip any trailing `/`.
fn validate_base_url(raw: &str) -> TollgateResult<String> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| TollgateError::config(format!("invalid base URL '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "https" => {}
        "http" => {
            let host = parsed.host_str().unwrap_or_default();
            if !matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1") {
                warn!(host = %host, "using insecure http:// base URL for non-loopback host");
            }
        }
        other => {
            return Err(TollgateError::config(format!(
                "unsupported base URL scheme '{}', use https://",
                other
            )))
        }
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_flag(key: &str, raw: &str) -> TollgateResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(TollgateError::config(format!(
            "{} must be one of true/1/yes/false/0/no, got '{}'",
            key, raw
        ))),
    }
}

fn seconds(key: &str, secs: f64) -> TollgateResult<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(TollgateError::config(format!(
            "{} must be a non-negative number of seconds, got {}",
            key, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| TollgateError::config(format!("{} is out of range ({} seconds): {}", key, secs, e)))
}

/// Like `seconds`, for the period of a background loop; zero would spin.
fn interval(key: &str, secs: f64) -> TollgateResult<Duration> {
    let period = seconds(key, secs)?;
    if period.is_zero() {
        return Err(TollgateError::config(format!("{} must be greater than zero", key)));
    }
    Ok(period)
}

fn optional_seconds(key: &str, secs: Option<f64>, default: Duration) -> TollgateResult<Duration> {
    secs.map_or(Ok(default), |s| seconds(key, s))
}

fn optional_interval(key: &str, secs: Option<f64>, default: Duration) -> TollgateResult<Duration> {
    secs.map_or(Ok(default), |s| interval(key, s))
}

/// Best-effort host name without platform calls.
///
/// Tries `HOSTNAME`, then `COMPUTERNAME`, then `/etc/hostname`.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}
