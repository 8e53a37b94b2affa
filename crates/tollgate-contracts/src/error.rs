//! Error types for the Tollgate authorization layer.
//!
//! Every fallible operation returns `TollgateResult<T>`. Only
//! `PolicyViolation` is meant to reach the code attempting a guarded action;
//! fetch, compile and delivery failures are recovered inside the crate that
//! produced them and surface only through logs.

use thiserror::Error;

/// The unified error type for Tollgate.
#[derive(Debug, Clone, Error)]
pub enum TollgateError {
    /// A guarded action was denied under `EnforcementMode::Block`.
    #[error("policy violation: {action} {target}: {reason}")]
    PolicyViolation {
        action: String,
        target: String,
        reason: String,
        policy_id: Option<String>,
    },

    /// A configuration value is missing or invalid. Fatal at construction.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The remote policy authority could not be reached or answered garbage.
    #[error("policy fetch failed: {reason}")]
    Fetch { reason: String },

    /// A single rule failed to parse or compile.
    #[error("failed to compile policy '{policy_id}': {reason}")]
    Compile { policy_id: String, reason: String },

    /// An event batch could not be delivered to the telemetry backend.
    #[error("event delivery failed: {reason}")]
    Delivery { reason: String },

    /// Low-level HTTP failure (connect, status, decode).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// `install()` was called on an interceptor that is already installed.
    #[error("interceptor for '{site}' already installed")]
    AlreadyInstalled { site: String },

    /// `uninstall()` was called on an interceptor that is not installed.
    #[error("interceptor for '{site}' not installed")]
    NotInstalled { site: String },

    /// `uninstall()` was called while a later interceptor still wraps this
    /// one on the same site. Uninstall the later one first.
    #[error("interceptor for '{site}' is wrapped by a later interceptor; uninstall that one first")]
    Shadowed { site: String },

    /// The client has been closed and can no longer perform network calls.
    #[error("client is closed")]
    ClientClosed,
}

impl TollgateError {
    /// Build a `PolicyViolation` from its parts.
    pub fn violation(
        action: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
        policy_id: Option<String>,
    ) -> Self {
        Self::PolicyViolation {
            action: action.into(),
            target: target.into(),
            reason: reason.into(),
            policy_id,
        }
    }

    /// Shorthand for a `Config` error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    /// Shorthand for a `Transport` error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    /// True if this error is a policy violation.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

/// Convenience alias used throughout the Tollgate crates.
pub type TollgateResult<T> = Result<T, TollgateError>;
