//! # tollgate-intercept
//!
//! Ready-made gates for the call sites an agent runtime exposes.
//!
//! | Gate | Action | Target |
//! |---|---|---|
//! | [`http_interceptor`] | `http` | `"<METHOD> <hostname>"` |
//! | [`tool_interceptor`] | `tool_call` | tool name |
//! | [`function_interceptor`] | `function_call` | `"<agent>/<function>"` |
//! | [`model_interceptor`] | `llm_call`, then `tool_call` per requested tool | model id |
//!
//! Each returns an [`Interceptor`](tollgate_core::Interceptor); call
//! `install()` (or `scoped()`) to activate it. For code without a call site,
//! [`gate_fn`] and [`gate_function_map`] wrap plain functions instead.

pub mod call;
pub mod llm;
pub mod network;
pub mod pii;

pub use call::{function_interceptor, gate_fn, gate_function_map, tool_interceptor, FunctionCall, FunctionMap, ToolCall};
pub use llm::{extract_message_texts, extract_tool_calls, model_interceptor, ChatRequest, ToolUseInspector};
pub use network::{http_interceptor, http_interceptor_from_config, HttpRequest, NetworkFilter};
pub use pii::PiiRedactor;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use tollgate_contracts::{
        config::ClientConfig,
        enforcement::EnforcementMode,
        error::{TollgateError, TollgateResult},
        event::{Event, EventType},
        policy::Policy,
    };
    use tollgate_core::{
        enforcer::Enforcer,
        intercept::CallSite,
        traits::{EventSink, PolicyDecider},
    };
    use tollgate_policy::CompiledEvaluator;

    use super::*;

    const ENDPOINT: &str = "https://api.tollgate.dev/api/v1";

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn of_type(&self, event_type: EventType) -> Vec<Event> {
            self.events().into_iter().filter(|e| e.event_type == event_type).collect()
        }
    }

    impl EventSink for RecordingSink {
        fn track(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        fn endpoint(&self) -> Option<&str> {
            Some(ENDPOINT)
        }
    }

    fn policies() -> Vec<Policy> {
        vec![
            Policy::new(
                "block-evil",
                r#"forbid (principal, action == Action::"http", resource) when { request.hostname == "evil.com" };"#,
            ),
            Policy::new("no-shell", r#"forbid (principal, action == Action::"tool_call", resource like "shell*");"#),
            Policy::new(
                "protect-db",
                r#"forbid (principal, action == Action::"function_call", resource == Function::"assistant/delete_db");"#,
            ),
            Policy::new("no-gpt4", r#"forbid (principal, action == Action::"llm_call", resource like "gpt-4*");"#),
            // Telemetry must never be blocked, even by a rule this broad.
            Policy::new(
                "block-tollgate",
                r#"forbid (principal, action == Action::"http", resource) when { request.hostname == "api.tollgate.dev" };"#,
            ),
        ]
    }

    fn enforcer(mode: EnforcementMode) -> (Arc<Enforcer>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let decider: Arc<dyn PolicyDecider> = Arc::new(CompiledEvaluator::from_policies(policies()));
        let enforcer = Enforcer::new(Some(decider), Some(sink.clone() as Arc<dyn EventSink>), mode);
        (Arc::new(enforcer), sink)
    }

    fn counting<A: 'static, R: 'static>(
        name: &str,
        calls: Arc<AtomicUsize>,
        reply: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> Arc<CallSite<A, R>> {
        Arc::new(CallSite::new(name, move |args: &A| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(reply(args))
        }))
    }

    // ── Network gate ──────────────────────────────────────────────────────────

    #[test]
    fn network_gate_blocks_denied_host() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = counting("http.send", calls.clone(), |_: &HttpRequest| 200u16);
        let gate = http_interceptor(site.clone(), enforcer, &[]).unwrap();
        gate.install().unwrap();

        let err = site.invoke(&HttpRequest::get("https://evil.com/steal")).unwrap_err();
        match err {
            TollgateError::PolicyViolation { action, target, policy_id, .. } => {
                assert_eq!(action, "http");
                assert_eq!(target, "GET evil.com");
                assert_eq!(policy_id.as_deref(), Some("block-evil"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(site.invoke(&HttpRequest::get("https://example.com/")).unwrap(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.of_type(EventType::PolicyViolation).len(), 1);
    }

    #[test]
    fn network_gate_never_evaluates_telemetry_endpoint() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = counting("http.send", calls.clone(), |_: &HttpRequest| 202u16);
        let gate = http_interceptor(site.clone(), enforcer, &[]).unwrap();

        gate.with_installed(|| {
            let url = format!("{}/agents/a1/events", ENDPOINT);
            assert_eq!(site.invoke(&HttpRequest::post(url)).unwrap(), 202);
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn network_gate_evaluates_hosts_disguised_as_telemetry() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = counting("http.send", calls.clone(), |_: &HttpRequest| 200u16);
        let gate = http_interceptor(site.clone(), enforcer, &[]).unwrap();
        let _guard = gate.scoped().unwrap();

        let err = site.invoke(&HttpRequest::post("https://api.tollgate.dev@evil.com/api/v1/agents")).unwrap_err();
        assert!(err.is_violation());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.of_type(EventType::PolicyViolation)[0].payload["policy_id"], "block-evil");
    }

    #[test]
    fn network_gate_honours_configured_exclusions() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let mut config = ClientConfig::for_api_key("tgk_test").unwrap();
        config.exclude_patterns = vec![r"evil\.com/health".to_string()];
        let site = counting("http.send", Arc::new(AtomicUsize::new(0)), |_: &HttpRequest| 200u16);
        let gate = http_interceptor_from_config(site.clone(), enforcer, &config).unwrap();
        let _guard = gate.scoped().unwrap();

        assert!(site.invoke(&HttpRequest::get("https://evil.com/health")).is_ok());
        assert!(site.invoke(&HttpRequest::get("https://evil.com/data")).is_err());
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn uninstalled_network_gate_is_transparent() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let site = counting("http.send", Arc::new(AtomicUsize::new(0)), |_: &HttpRequest| 200u16);
        {
            let gate = http_interceptor(site.clone(), enforcer, &[]).unwrap();
            let _guard = gate.scoped().unwrap();
            assert!(site.invoke(&HttpRequest::get("https://evil.com/")).is_err());
        }
        assert!(site.invoke(&HttpRequest::get("https://evil.com/")).is_ok());
        assert_eq!(sink.events().len(), 1);
    }

    // ── Tool and function gates ───────────────────────────────────────────────

    #[test]
    fn tool_gate_blocks_forbidden_tool() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = counting("tool.run", calls.clone(), |call: &ToolCall| format!("ran {}", call.name));
        let gate = tool_interceptor(site.clone(), enforcer);
        gate.install().unwrap();

        let err = site.invoke(&ToolCall::new("shell_exec", json!({"cmd": "rm -rf /"}))).unwrap_err();
        assert!(err.is_violation());
        assert_eq!(site.invoke(&ToolCall::new("web_search", json!({}))).unwrap(), "ran web_search");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let violations = sink.of_type(EventType::PolicyViolation);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "policy_violation_tool_call");
        assert_eq!(violations[0].payload["target"], "shell_exec");
        assert_eq!(violations[0].payload["policy_id"], "no-shell");
    }

    #[test]
    fn function_gate_keys_on_agent_and_name() {
        let (enforcer, _sink) = enforcer(EnforcementMode::Block);
        let site = counting("function.exec", Arc::new(AtomicUsize::new(0)), |_: &FunctionCall| json!("done"));
        let gate = function_interceptor(site.clone(), enforcer);
        let _guard = gate.scoped().unwrap();

        let denied = FunctionCall::new("delete_db", json!({})).by_agent("assistant");
        assert!(site.invoke(&denied).unwrap_err().is_violation());

        // Same function, different agent: not covered by the rule.
        let other = FunctionCall::new("delete_db", json!({})).by_agent("admin");
        assert_eq!(site.invoke(&other).unwrap(), json!("done"));
        assert!(site.invoke(&FunctionCall::new("delete_db", json!({}))).is_ok());
    }

    #[test]
    fn gate_fn_blocks_before_running() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let shell = gate_fn(enforcer.clone(), "tool_call", "shell", move |cmd: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            cmd.len()
        });
        assert!(shell("ls".to_string()).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let search = gate_fn(enforcer, "tool_call", "web_search", |q: String| q.to_uppercase());
        assert_eq!(search("rust".to_string()).unwrap(), "RUST");
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn gate_function_map_wraps_every_entry() {
        let (enforcer, _sink) = enforcer(EnforcementMode::Block);
        let mut functions: FunctionMap = HashMap::new();
        functions.insert("delete_db".into(), Arc::new(|_: &Value| -> TollgateResult<Value> { Ok(json!("dropped")) }));
        functions.insert("read_db".into(), Arc::new(|args: &Value| -> TollgateResult<Value> { Ok(json!({"rows": args["limit"]})) }));

        let gated = gate_function_map(enforcer, Some("assistant"), functions);
        assert_eq!(gated.len(), 2);
        assert!(gated["delete_db"](&json!({})).unwrap_err().is_violation());
        assert_eq!(gated["read_db"](&json!({"limit": 5})).unwrap(), json!({"rows": 5}));
    }

    #[test]
    fn warn_mode_lets_denied_calls_through() {
        let (enforcer, sink) = enforcer(EnforcementMode::Warn);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = counting("tool.run", calls.clone(), |_: &ToolCall| "ok");
        let gate = tool_interceptor(site.clone(), enforcer);
        let _guard = gate.scoped().unwrap();

        assert_eq!(site.invoke(&ToolCall::new("shell_exec", json!({}))).unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let violations = sink.of_type(EventType::PolicyViolation);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].metadata["enforcement"], "warn");
    }

    // ── Model gate ────────────────────────────────────────────────────────────

    fn model_site(calls: Arc<AtomicUsize>, response: Value) -> Arc<CallSite<ChatRequest, Value>> {
        counting("llm.chat", calls, move |_: &ChatRequest| response.clone())
    }

    #[test]
    fn model_gate_blocks_forbidden_model_before_the_call() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let site = model_site(calls.clone(), json!({"content": []}));
        let gate = model_interceptor(site.clone(), enforcer, None);
        let _guard = gate.scoped().unwrap();

        let err = site.invoke(&ChatRequest::new("openai", "gpt-4o", json!([]))).unwrap_err();
        match err {
            TollgateError::PolicyViolation { action, target, .. } => {
                assert_eq!(action, "llm_call");
                assert_eq!(target, "gpt-4o");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.of_type(EventType::LlmInvoke).is_empty());
    }

    #[test]
    fn model_gate_blocks_forbidden_tool_in_response() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let calls = Arc::new(AtomicUsize::new(0));
        let response = json!({
            "content": [
                {"type": "text", "text": "running it"},
                {"type": "tool_use", "id": "t1", "name": "shell_exec", "input": {"cmd": "ls"}}
            ]
        });
        let site = model_site(calls.clone(), response);
        let gate = model_interceptor(site.clone(), enforcer, None);
        let _guard = gate.scoped().unwrap();

        let request = ChatRequest::new("anthropic", "claude-haiku", json!([{"role": "user", "content": "list files"}]));
        let err = site.invoke(&request).unwrap_err();
        match err {
            TollgateError::PolicyViolation { action, target, .. } => {
                assert_eq!(action, "tool_call");
                assert_eq!(target, "shell_exec");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Invocation recorded first, then the violation.
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::LlmInvoke);
        assert_eq!(events[0].name, "llm_anthropic_claude-haiku");
        assert!(!events[0].payload.contains_key("messages"));
        assert_eq!(events[1].event_type, EventType::PolicyViolation);
    }

    #[test]
    fn model_gate_redacts_message_text() {
        let (enforcer, sink) = enforcer(EnforcementMode::Block);
        let site = model_site(Arc::new(AtomicUsize::new(0)), json!({"choices": [{"message": {"content": "ok"}}]}));
        let gate = model_interceptor(site.clone(), enforcer, Some(PiiRedactor::new()));
        let _guard = gate.scoped().unwrap();

        let messages = json!([
            {"role": "user", "content": "email me at jane@corp.com"},
            {"role": "user", "content": [{"type": "text", "text": "ssn 123-45-6789"}]}
        ]);
        let response = site.invoke(&ChatRequest::new("openai", "gpt-3.5-turbo", messages)).unwrap();
        assert_eq!(response["choices"][0]["message"]["content"], "ok");

        let invokes = sink.of_type(EventType::LlmInvoke);
        assert_eq!(invokes.len(), 1);
        let recorded = invokes[0].payload["messages"].as_array().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0], "email me at [REDACTED_EMAIL]");
        assert_eq!(recorded[1], "ssn [REDACTED_SSN]");
        assert_eq!(invokes[0].payload["provider"], "openai");
    }

    #[test]
    fn model_gate_in_log_mode_returns_response() {
        let (enforcer, sink) = enforcer(EnforcementMode::Log);
        let response = json!({
            "choices": [{"message": {"tool_calls": [{"function": {"name": "shell_run"}}]}}]
        });
        let site = model_site(Arc::new(AtomicUsize::new(0)), response.clone());
        let gate = model_interceptor(site.clone(), enforcer, None);
        let _guard = gate.scoped().unwrap();

        assert_eq!(site.invoke(&ChatRequest::new("openai", "gpt-4o", json!([]))).unwrap(), response);
        // Model and tool both denied, both recorded.
        assert_eq!(sink.of_type(EventType::PolicyViolation).len(), 2);
        assert_eq!(sink.of_type(EventType::LlmInvoke).len(), 1);
    }
}
