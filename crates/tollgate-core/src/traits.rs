//! Core trait definitions for the Tollgate pipeline.
//!
//! These four traits define the seams between components:
//!
//! - `PolicyDecider`: trusted gate (answers allow/deny for one request)
//! - `PolicySource`: where policies come from (remote authority, file)
//! - `EventSink`: where violations and invocations are reported
//! - `Transport`: authenticated JSON-over-HTTP to the backend
//!
//! The `Enforcer` composes a decider and a sink; interceptors compose an
//! enforcer with a call site.

use serde_json::Value;

use tollgate_contracts::{
    error::TollgateResult,
    event::Event,
    policy::{EvaluationResult, Policy},
    request::RequestContext,
};

/// Answers whether a request is allowed.
///
/// Implementations must not fail and must not block on I/O: conditions that
/// prevent a trustworthy answer resolve to `Allow` with an explanatory
/// reason (fail-open).
pub trait PolicyDecider: Send + Sync {
    fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult;
}

/// Produces the full current policy list.
pub trait PolicySource: Send + Sync {
    /// Fetch every policy, enabled or not.
    ///
    /// Errors are recovered by the caller; implementations should not log
    /// them a second time.
    fn fetch_policies(&self) -> TollgateResult<Vec<Policy>>;
}

/// Accepts events for eventual delivery. Never blocks, never fails.
pub trait EventSink: Send + Sync {
    fn track(&self, event: Event);

    /// Base URL of the backend this sink delivers to, if any.
    ///
    /// Network interception uses it to avoid gating its own telemetry.
    fn endpoint(&self) -> Option<&str> {
        None
    }
}

/// Authenticated JSON transport to the backend.
///
/// `path` is relative to `base_url()` and starts with `/`.
pub trait Transport: Send + Sync {
    fn base_url(&self) -> &str;

    fn get_json(&self, path: &str) -> TollgateResult<Value>;

    fn post_json(&self, path: &str, body: &Value) -> TollgateResult<Value>;

    /// Release network resources. Later calls fail with `ClientClosed`.
    fn close(&self) {}
}
