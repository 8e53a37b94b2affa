//! Enforcement modes.
//!
//! The mode decides what happens to an action after the evaluator has
//! already said `Deny`. Allowed actions never consult it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TollgateError;

/// How strictly a `Deny` decision is acted upon.
///
/// Ordered by strictness: `Block < Warn < Log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Abort the guarded action with a `PolicyViolation` error.
    Block,
    /// Log a warning and let the action proceed.
    Warn,
    /// Report through telemetry only and let the action proceed.
    #[default]
    Log,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Block => "block",
            EnforcementMode::Warn => "warn",
            EnforcementMode::Log => "log",
        }
    }
}

impl FromStr for EnforcementMode {
    type Err = TollgateError;

    /// Case-insensitive parse. Anything other than block/warn/log is a
    /// configuration error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(EnforcementMode::Block),
            "warn" => Ok(EnforcementMode::Warn),
            "log" => Ok(EnforcementMode::Log),
            other => Err(TollgateError::config(format!(
                "invalid enforcement mode '{}': expected one of block, warn, log",
                other
            ))),
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
