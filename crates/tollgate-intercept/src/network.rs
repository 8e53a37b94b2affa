//! Network-level gate: outbound HTTP keyed by hostname and method.
//!
//! Two classes of request are never evaluated: anything addressed to the
//! telemetry backend itself (same origin as the sink's endpoint) and any
//! URL matching one of the configured exclusion regexes. Both checks run
//! before the decider is consulted, so a deny-everything policy cannot
//! stop the client from reporting its own violations.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use tollgate_contracts::{
    config::ClientConfig,
    error::{TollgateError, TollgateResult},
    request::RequestContext,
};
use tollgate_core::{
    enforcer::Enforcer,
    intercept::{CallSite, Interceptor, TargetExtractor},
};

/// The part of an outbound request the gate needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }
}

/// Decides which requests are evaluated and builds their context.
#[derive(Debug, Clone)]
pub struct NetworkFilter {
    internal_origin: Option<url::Origin>,
    excludes: Vec<Regex>,
}

impl NetworkFilter {
    /// `internal` is the telemetry base URL; `exclude_patterns` are regexes
    /// searched anywhere in the URL.
    ///
    /// Returns `TollgateError::Config` for a pattern that does not compile.
    pub fn new(internal: Option<&str>, exclude_patterns: &[String]) -> TollgateResult<Self> {
        let excludes = exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| TollgateError::config(format!("invalid exclude pattern '{}': {}", p, e)))
            })
            .collect::<TollgateResult<Vec<_>>>()?;

        let internal_origin = internal
            .and_then(|base| Url::parse(base).ok())
            .map(|u| u.origin())
            .filter(|o| o.is_tuple());

        Ok(Self {
            internal_origin,
            excludes,
        })
    }

    /// True if `url` must bypass evaluation.
    ///
    /// Self-exclusion compares parsed origins (scheme, host, port), never
    /// raw string prefixes: `https://api.example.com.evil.net` and
    /// `https://api.example.com@evil.net` are different hosts.
    pub fn is_excluded(&self, url: &str) -> bool {
        if let (Some(origin), Ok(parsed)) = (&self.internal_origin, Url::parse(url)) {
            if parsed.origin() == *origin {
                return true;
            }
        }
        self.excludes.iter().any(|re| re.is_match(url))
    }

    /// Context for `request`, or `None` if it is excluded.
    pub fn context_for(&self, request: &HttpRequest) -> Option<RequestContext> {
        if self.is_excluded(&request.url) {
            debug!(url = %request.url, "request excluded from policy evaluation");
            return None;
        }
        Some(RequestContext::http(&request.url, &request.method))
    }
}

impl TargetExtractor<HttpRequest> for NetworkFilter {
    fn extract(&self, request: &HttpRequest) -> Option<RequestContext> {
        self.context_for(request)
    }
}

/// Gate `site` on hostname and method.
///
/// The telemetry endpoint is taken from the enforcer's sink.
pub fn http_interceptor<R: 'static>(
    site: Arc<CallSite<HttpRequest, R>>,
    enforcer: Arc<Enforcer>,
    exclude_patterns: &[String],
) -> TollgateResult<Interceptor<HttpRequest, R>> {
    let internal = enforcer.sink().and_then(|sink| sink.endpoint()).map(str::to_string);
    let filter = NetworkFilter::new(internal.as_deref(), exclude_patterns)?;
    Ok(Interceptor::new(site, enforcer, filter))
}

/// Like `http_interceptor`, with the exclusion list from `config`.
pub fn http_interceptor_from_config<R: 'static>(
    site: Arc<CallSite<HttpRequest, R>>,
    enforcer: Arc<Enforcer>,
    config: &ClientConfig,
) -> TollgateResult<Interceptor<HttpRequest, R>> {
    http_interceptor(site, enforcer, &config.exclude_patterns)
}
