//! # tollgate-policy
//!
//! Rule compilation and the self-refreshing policy cache for Tollgate.
//!
//! ## Overview
//!
//! [`PolicyCache`] keeps a [`CompiledEvaluator`] current against a
//! [`PolicySource`](tollgate_core::traits::PolicySource) and implements the
//! [`PolicyDecider`](tollgate_core::traits::PolicyDecider) trait. Any
//! enabled `forbid` rule that matches a request denies it; everything else
//! is allowed. When the cache cannot vouch for its rules (no successful
//! refresh within `stale_ttl`) it allows everything and says so in the
//! reason.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use tollgate_policy::{BundlePolicySource, PolicyCache};
//!
//! let source = BundlePolicySource::from_file(Path::new("policies/bundle.toml"))?;
//! let cache = PolicyCache::new(Some(Arc::new(source)), interval, stale_ttl);
//! // Pass `cache` to `tollgate_core::Enforcer::new(...)`.
//! ```

pub mod cache;
pub mod engine;
pub mod rule;
pub mod source;

pub use cache::{CacheStats, PolicyCache, RefreshOutcome};
pub use engine::CompiledEvaluator;
pub use rule::{parse_rules, Effect, Rule};
pub use source::{BundlePolicySource, RemotePolicySource};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tollgate_contracts::{
        enforcement::EnforcementMode,
        event::{Event, EventType},
        request::RequestContext,
    };
    use tollgate_core::{
        enforcer::Enforcer,
        traits::{EventSink, PolicyDecider, PolicySource},
    };

    use super::*;

    const BUNDLE: &str = r#"
[[policies]]
id = "block-evil"
source = '''
// exfiltration endpoints
forbid (principal, action == Action::"http", resource)
  when { request.hostname == "evil.com" };
'''

[[policies]]
id = "no-shell"
source = 'forbid (principal, action == Action::"tool_call", resource like "shell*");'

[[policies]]
id = "retired"
source = 'forbid (principal, action, resource);'
enabled = false
"#;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingSink {
        fn track(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn bundle_cache() -> PolicyCache {
        let source = BundlePolicySource::from_toml_str(BUNDLE).unwrap();
        PolicyCache::new(
            Some(Arc::new(source) as Arc<dyn PolicySource>),
            Duration::from_secs(999),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn bundle_cache_gates_http_and_tools() {
        let cache = bundle_cache();

        assert!(!cache.evaluate(&RequestContext::http("https://evil.com/upload", "PUT")).is_allowed());
        assert!(cache.evaluate(&RequestContext::http("https://api.openai.com", "POST")).is_allowed());
        assert!(!cache.evaluate(&RequestContext::action("tool_call", "shell_exec")).is_allowed());
        assert!(cache.evaluate(&RequestContext::action("tool_call", "web_search")).is_allowed());
        assert_eq!(cache.stats().policy_count, 2, "disabled policy must not compile");
    }

    #[test]
    fn cache_drives_enforcer_block_mode() {
        let cache: Arc<dyn PolicyDecider> = Arc::new(bundle_cache());
        let sink = Arc::new(RecordingSink::default());
        let enforcer = Enforcer::new(Some(cache), Some(sink.clone() as Arc<dyn EventSink>), EnforcementMode::Block);

        let err = enforcer
            .check(&RequestContext::http("https://evil.com/upload", "PUT"))
            .unwrap_err();
        assert!(err.is_violation());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PolicyViolation);
        assert_eq!(events[0].payload["policy_id"], "block-evil");
    }
}
