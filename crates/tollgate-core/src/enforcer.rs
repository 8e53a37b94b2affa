//! The enforcement controller: where an evaluation becomes behaviour.
//!
//! Every guarded action passes through the same pipeline:
//!
//!   RequestContext → PolicyDecider → [Deny?] → EventSink → EnforcementMode
//!
//! An allowed action touches nothing but the decider. A denied action is
//! always reported to the sink first, whatever the mode; only then does the
//! mode decide whether the caller gets an error (`Block`), a warning in the
//! log (`Warn`), or nothing further (`Log`).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use tollgate_contracts::{
    enforcement::EnforcementMode,
    error::{TollgateError, TollgateResult},
    event::{Event, EventType},
    policy::EvaluationResult,
    request::RequestContext,
};

use crate::traits::{EventSink, PolicyDecider};

/// Reason reported when no decider is configured.
pub const NO_POLICY_CACHE: &str = "No policy cache";

/// Composes a policy decider and an event sink under one enforcement mode.
///
/// Both collaborators are optional: without a decider everything is
/// allowed, without a sink violations are only logged.
#[derive(Clone)]
pub struct Enforcer {
    decider: Option<Arc<dyn PolicyDecider>>,
    sink: Option<Arc<dyn EventSink>>,
    mode: EnforcementMode,
}

impl Enforcer {
    pub fn new(
        decider: Option<Arc<dyn PolicyDecider>>,
        sink: Option<Arc<dyn EventSink>>,
        mode: EnforcementMode,
    ) -> Self {
        Self { decider, sink, mode }
    }

    /// Like `new`, parsing the mode from a string.
    ///
    /// Returns `TollgateError::Config` for an unknown mode.
    pub fn with_mode_str(
        decider: Option<Arc<dyn PolicyDecider>>,
        sink: Option<Arc<dyn EventSink>>,
        mode: &str,
    ) -> TollgateResult<Self> {
        Ok(Self::new(decider, sink, mode.parse()?))
    }

    /// An enforcer with no decider and no sink. Allows everything.
    pub fn permissive() -> Self {
        Self::new(None, None, EnforcementMode::Log)
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    pub fn sink(&self) -> Option<&Arc<dyn EventSink>> {
        self.sink.as_ref()
    }

    /// Ask the decider about `ctx`.
    pub fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        match &self.decider {
            Some(decider) => decider.evaluate(ctx),
            None => EvaluationResult::allow(NO_POLICY_CACHE),
        }
    }

    /// Act on an evaluation.
    ///
    /// # Pipeline
    ///
    /// 1. Allowed → return `Ok(())` immediately, emitting nothing.
    /// 2. Denied → emit one `PolicyViolation` event to the sink, if any.
    /// 3. Branch on mode:
    ///    - `Block` → `Err(TollgateError::PolicyViolation)`
    ///    - `Warn`  → `warn!` and `Ok(())`
    ///    - `Log`   → `Ok(())`
    pub fn enforce(&self, result: &EvaluationResult, action: &str, target: &str) -> TollgateResult<()> {
        if result.is_allowed() {
            return Ok(());
        }

        if let Some(sink) = &self.sink {
            let mut event = Event::new(EventType::PolicyViolation, format!("policy_violation_{}", action))
                .with_payload("action", action)
                .with_payload("target", target)
                .with_payload("reason", result.reason.as_str())
                .with_metadata("enforcement", self.mode.as_str());
            if let Some(policy_id) = &result.policy_id {
                event = event.with_payload("policy_id", Value::String(policy_id.clone()));
            }
            sink.track(event);
        }

        match self.mode {
            EnforcementMode::Block => {
                debug!(action = %action, target = %target, reason = %result.reason, "blocking denied action");
                Err(TollgateError::violation(
                    action,
                    target,
                    result.reason.clone(),
                    result.policy_id.clone(),
                ))
            }
            EnforcementMode::Warn => {
                warn!(
                    action = %action,
                    target = %target,
                    reason = %result.reason,
                    policy_id = ?result.policy_id,
                    "policy violation (warn mode, action proceeds)"
                );
                Ok(())
            }
            EnforcementMode::Log => Ok(()),
        }
    }

    /// Evaluate `ctx` and enforce the result in one step.
    pub fn check(&self, ctx: &RequestContext) -> TollgateResult<EvaluationResult> {
        let result = self.evaluate(ctx);
        debug!(
            action = %ctx.action_type,
            target = %ctx.target,
            decision = ?result.decision,
            "evaluated guarded action"
        );
        self.enforce(&result, ctx.action_type.as_str(), &ctx.target)?;
        Ok(result)
    }
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("mode", &self.mode)
            .field("has_decider", &self.decider.is_some())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tollgate_contracts::{
        enforcement::EnforcementMode,
        error::TollgateError,
        event::{Event, EventType},
        policy::{Decision, EvaluationResult},
        request::RequestContext,
    };

    use crate::traits::{EventSink, PolicyDecider};

    use super::{Enforcer, NO_POLICY_CACHE};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// A decider that always returns a pre-configured result.
    struct MockDecider {
        result: EvaluationResult,
    }

    impl PolicyDecider for MockDecider {
        fn evaluate(&self, _ctx: &RequestContext) -> EvaluationResult {
            self.result.clone()
        }
    }

    /// A sink that records every tracked event.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingSink {
        fn track(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn deny_all() -> Arc<dyn PolicyDecider> {
        Arc::new(MockDecider {
            result: EvaluationResult::deny("Mock deny-all", "pol_1"),
        })
    }

    fn allow_all() -> Arc<dyn PolicyDecider> {
        Arc::new(MockDecider {
            result: EvaluationResult::allow("Mock allow-all"),
        })
    }

    fn enforcer(decider: Arc<dyn PolicyDecider>, mode: EnforcementMode) -> (Enforcer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let enforcer = Enforcer::new(Some(decider), Some(sink.clone() as Arc<dyn EventSink>), mode);
        (enforcer, sink)
    }

    fn ctx() -> RequestContext {
        RequestContext::http("https://evil.com/api", "GET")
    }

    // ── Test cases ────────────────────────────────────────────────────────────

    #[test]
    fn test_block_emits_one_event_and_errors() {
        let (enforcer, sink) = enforcer(deny_all(), EnforcementMode::Block);

        let err = enforcer.check(&ctx()).unwrap_err();
        match err {
            TollgateError::PolicyViolation { action, target, reason, policy_id } => {
                assert_eq!(action, "http");
                assert_eq!(target, "GET evil.com");
                assert_eq!(reason, "Mock deny-all");
                assert_eq!(policy_id.as_deref(), Some("pol_1"));
            }
            other => panic!("expected PolicyViolation, got {:?}", other),
        }

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PolicyViolation);
        assert_eq!(events[0].name, "policy_violation_http");
        assert_eq!(events[0].payload["target"], "GET evil.com");
        assert_eq!(events[0].metadata["enforcement"], "block");
    }

    #[test]
    fn test_warn_emits_event_without_error() {
        let (enforcer, sink) = enforcer(deny_all(), EnforcementMode::Warn);

        let result = enforcer.check(&ctx()).unwrap();
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert_eq!(sink.events.lock().unwrap()[0].metadata["enforcement"], "warn");
    }

    #[test]
    fn test_log_emits_event_without_error() {
        let (enforcer, sink) = enforcer(deny_all(), EnforcementMode::Log);

        assert!(enforcer.check(&ctx()).is_ok());
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_allow_never_emits_or_errors() {
        for mode in [EnforcementMode::Block, EnforcementMode::Warn, EnforcementMode::Log] {
            let (enforcer, sink) = enforcer(allow_all(), mode);
            assert!(enforcer.check(&ctx()).is_ok());
            assert!(sink.events.lock().unwrap().is_empty(), "allowed action emitted under {mode}");
        }
    }

    #[test]
    fn test_no_decider_allows() {
        let enforcer = Enforcer::new(None, None, EnforcementMode::Block);
        let result = enforcer.check(&ctx()).unwrap();
        assert!(result.is_allowed());
        assert_eq!(result.reason, NO_POLICY_CACHE);
    }

    #[test]
    fn test_block_without_sink_still_errors() {
        let enforcer = Enforcer::new(Some(deny_all()), None, EnforcementMode::Block);
        assert!(enforcer.check(&ctx()).is_err());
    }

    #[test]
    fn test_mode_from_string() {
        let enforcer = Enforcer::with_mode_str(None, None, "BLOCK").unwrap();
        assert_eq!(enforcer.mode(), EnforcementMode::Block);
        assert!(Enforcer::with_mode_str(None, None, "bad").is_err());
    }
}
