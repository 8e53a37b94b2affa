//! Compiled rule evaluator.
//!
//! `CompiledEvaluator` is built once per distinct `PolicySet` and never
//! mutated afterwards, so it can be shared across threads behind an `Arc`.
//!
//! Evaluation algorithm:
//!
//! 1. Iterate compiled forbid rules.
//! 2. The first rule whose scope and conditions match → `Deny`, attributed
//!    to the rule's policy.
//! 3. No forbid rule matched → `Allow`.
//!
//! `permit` rules are compiled (so syntax errors surface) but never change
//! the decision: the default posture is already allow.

use tracing::{debug, warn};

use tollgate_contracts::{
    policy::{EvaluationResult, Policy, PolicySet},
    request::RequestContext,
};
use tollgate_core::traits::PolicyDecider;

use crate::rule::{parse_rules, Effect, Rule};

/// Reason attached to an allow when nothing matched.
pub const NO_MATCH_REASON: &str = "No forbid policy matched";

/// The decision function for one policy set.
#[derive(Debug, Default)]
pub struct CompiledEvaluator {
    forbids: Vec<Rule>,
    permits: usize,
    policies: usize,
    skipped: usize,
}

impl CompiledEvaluator {
    /// An evaluator with no rules. Allows everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Compile every enabled policy in `set`.
    ///
    /// Disabled policies are ignored entirely. A rule that fails to parse is
    /// logged and skipped; the rest of the set still compiles.
    pub fn compile(set: &PolicySet) -> Self {
        let mut evaluator = Self::default();

        for policy in set.enabled() {
            evaluator.policies += 1;
            for parsed in parse_rules(&policy.id, &policy.source_text) {
                match parsed {
                    Ok(rule) if rule.effect == Effect::Forbid => evaluator.forbids.push(rule),
                    Ok(_) => evaluator.permits += 1,
                    Err(e) => {
                        warn!(policy_id = %policy.id, error = %e, "skipping rule that failed to compile");
                        evaluator.skipped += 1;
                    }
                }
            }
        }

        debug!(
            policies = evaluator.policies,
            forbid_rules = evaluator.forbids.len(),
            permit_rules = evaluator.permits,
            skipped = evaluator.skipped,
            "compiled policy set"
        );
        evaluator
    }

    /// Shorthand for `compile(&PolicySet::new(policies))`.
    pub fn from_policies(policies: Vec<Policy>) -> Self {
        Self::compile(&PolicySet::new(policies))
    }

    /// Enabled policies that went into this evaluator.
    pub fn policy_count(&self) -> usize {
        self.policies
    }

    /// Rules that compiled, forbid and permit together.
    pub fn rule_count(&self) -> usize {
        self.forbids.len() + self.permits
    }

    /// Rules dropped because they failed to compile.
    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        match self.forbids.iter().find(|rule| rule.matches(ctx)) {
            Some(rule) => {
                debug!(
                    rule_id = %rule.id,
                    action = %ctx.action_type,
                    target = %ctx.target,
                    "forbid rule matched"
                );
                EvaluationResult::deny(format!("Denied by policy '{}'", rule.id), rule.policy_id.clone())
            }
            None => EvaluationResult::allow(NO_MATCH_REASON),
        }
    }
}

impl PolicyDecider for CompiledEvaluator {
    fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        CompiledEvaluator::evaluate(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use tollgate_contracts::{
        policy::{Decision, Policy},
        request::RequestContext,
    };

    use super::*;

    const EVIL: &str = r#"forbid (principal, action == Action::"http", resource) when { request.hostname == "evil.com" };"#;

    #[test]
    fn denies_matching_forbid() {
        let evaluator = CompiledEvaluator::from_policies(vec![Policy::new("pol_evil", EVIL)]);
        let result = evaluator.evaluate(&RequestContext::http("https://evil.com/steal", "POST"));
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.policy_id.as_deref(), Some("pol_evil"));
        assert!(result.reason.contains("pol_evil"));
    }

    #[test]
    fn allows_when_nothing_matches() {
        let evaluator = CompiledEvaluator::from_policies(vec![Policy::new("pol_evil", EVIL)]);
        let result = evaluator.evaluate(&RequestContext::http("https://good.com", "GET"));
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.reason, NO_MATCH_REASON);
    }

    #[test]
    fn disabled_policies_are_not_compiled() {
        let evaluator = CompiledEvaluator::from_policies(vec![Policy::new("pol_evil", EVIL).with_enabled(false)]);
        assert_eq!(evaluator.policy_count(), 0);
        assert!(evaluator.evaluate(&RequestContext::http("https://evil.com", "GET")).is_allowed());
    }

    #[test]
    fn broken_rule_is_skipped_not_fatal() {
        let evaluator = CompiledEvaluator::from_policies(vec![
            Policy::new("broken", "forbid (principal, action"),
            Policy::new("pol_evil", EVIL),
        ]);
        assert_eq!(evaluator.skipped_count(), 1);
        assert_eq!(evaluator.rule_count(), 1);
        assert!(!evaluator.evaluate(&RequestContext::http("https://evil.com", "GET")).is_allowed());
    }

    #[test]
    fn permit_rules_do_not_override_forbid() {
        let evaluator = CompiledEvaluator::from_policies(vec![
            Policy::new("allow_all", "permit (principal, action, resource);"),
            Policy::new("pol_evil", EVIL),
        ]);
        assert_eq!(evaluator.rule_count(), 2);
        assert!(!evaluator.evaluate(&RequestContext::http("https://evil.com", "GET")).is_allowed());
    }

    #[test]
    fn allow_all_has_no_rules() {
        let evaluator = CompiledEvaluator::allow_all();
        assert_eq!(evaluator.rule_count(), 0);
        assert!(evaluator.evaluate(&RequestContext::action("tool_call", "anything")).is_allowed());
    }
}
