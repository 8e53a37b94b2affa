//! Policy, policy-set and decision types.
//!
//! Policies are authored and stored by the remote authority; this process
//! only ever reads them. A `PolicySet` is one fetched snapshot together with
//! an order-independent content hash used to skip needless recompilation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single authorization rule as delivered by the policy authority.
///
/// On the wire the rule text is carried in `cedar_dsl`; local bundle files
/// may use `source` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable identifier, reported back in denials.
    pub id: String,
    /// Rule text in the restricted rule language.
    #[serde(rename = "cedar_dsl", alias = "source")]
    pub source_text: String,
    /// Disabled policies are fetched but never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    /// Construct an enabled policy.
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            enabled: true,
        }
    }

    /// Return a copy of this policy with `enabled` set.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// The collection of policies returned by one fetch, plus its content hash.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: Vec<Policy>,
    hash: String,
}

impl PolicySet {
    /// Wrap `policies` and compute the content hash.
    pub fn new(policies: Vec<Policy>) -> Self {
        let hash = Self::content_hash(&policies);
        Self { policies, hash }
    }

    /// Hash of `(id, source_text, enabled)` for every member.
    ///
    /// Members are sorted before hashing so the result does not depend on
    /// the order the authority returned them in. Each field is length
    /// prefixed so that adjacent fields cannot bleed into each other.
    ///
    /// Returns a lowercase 64-character hex string.
    pub fn content_hash(policies: &[Policy]) -> String {
        let mut members: Vec<(&str, &str, bool)> = policies
            .iter()
            .map(|p| (p.id.as_str(), p.source_text.as_str(), p.enabled))
            .collect();
        members.sort();

        let mut hasher = Sha256::new();
        for (id, source, enabled) in members {
            hasher.update((id.len() as u64).to_le_bytes());
            hasher.update(id.as_bytes());
            hasher.update((source.len() as u64).to_le_bytes());
            hasher.update(source.as_bytes());
            hasher.update([enabled as u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// The content hash of this set.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// All fetched policies, enabled or not, in fetch order.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Iterator over the enabled policies only.
    pub fn enabled(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(|p| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// The outcome of evaluating a request against the active rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Deny,
}

/// Decision plus a human-readable reason and the id of the deciding policy.
///
/// Returned by every evaluation call. Evaluation never fails: conditions
/// that prevent a trustworthy decision resolve to `Allow` with a reason
/// explaining why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    pub reason: String,
    pub policy_id: Option<String>,
}

impl EvaluationResult {
    /// An `Allow` result with no deciding policy.
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
            policy_id: None,
        }
    }

    /// A `Deny` result attributed to `policy_id`.
    pub fn deny(reason: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            policy_id: Some(policy_id.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}
