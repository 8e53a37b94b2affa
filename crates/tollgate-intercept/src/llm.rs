//! Model-invocation gate with response inspection.
//!
//! Before the call: evaluate `llm_call` on the model id. After it: record an
//! `LlmInvoke` event, then evaluate every tool the model asked for as a
//! `tool_call`. Tool-use requests only exist once the response is back, so
//! a forbidden tool surfaces as a violation on the model call itself.
//!
//! Responses are plain JSON in either of the two common shapes:
//! `choices[].message.tool_calls[].function.name` or `content[]` blocks
//! with `type == "tool_use"`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use tollgate_contracts::{
    event::{Event, EventType},
    request::{ActionType, RequestContext},
};
use tollgate_core::{
    enforcer::Enforcer,
    intercept::{CallSite, Interceptor, ResponseInspector},
    traits::EventSink,
};

use crate::pii::PiiRedactor;

/// A chat/completions request as the gate sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// `openai`, `anthropic`, ...
    pub provider: String,
    pub model: String,
    /// The provider's `messages` array, untouched.
    pub messages: Value,
}

impl ChatRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, messages: Value) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages,
        }
    }
}

/// Tool names the model requested, in response order.
pub fn extract_tool_calls(response: &Value) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(choices) = response.get("choices").and_then(Value::as_array) {
        for choice in choices {
            let calls = choice
                .pointer("/message/tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten();
            for call in calls {
                if let Some(function) = call.get("function") {
                    names.push(str_field(function, "name"));
                }
            }
        }
    }

    if let Some(blocks) = response.get("content").and_then(Value::as_array) {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                names.push(str_field(block, "name"));
            }
        }
    }

    names
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Text content of a `messages` array: string contents and `{type: "text"}`
/// parts.
pub fn extract_message_texts(messages: &Value) -> Vec<String> {
    let Some(messages) = messages.as_array() else {
        return Vec::new();
    };
    let mut texts = Vec::new();
    for message in messages {
        match message.get("content") {
            Some(Value::String(text)) => texts.push(text.clone()),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if part.get("type").and_then(Value::as_str) == Some("text") {
                        texts.push(str_field_or_empty(part, "text"));
                    }
                }
            }
            _ => {}
        }
    }
    texts
}

fn str_field_or_empty(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Records the invocation and lists the tools it requested.
pub struct ToolUseInspector {
    sink: Option<Arc<dyn EventSink>>,
    redactor: Option<PiiRedactor>,
}

impl ToolUseInspector {
    /// Message text is only attached to the event when a redactor is set.
    pub fn new(sink: Option<Arc<dyn EventSink>>, redactor: Option<PiiRedactor>) -> Self {
        Self { sink, redactor }
    }

    fn record(&self, request: &ChatRequest) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut payload = Map::new();
        payload.insert("provider".into(), Value::String(request.provider.clone()));
        payload.insert("model".into(), Value::String(request.model.clone()));
        if let Some(redactor) = &self.redactor {
            let texts = extract_message_texts(&request.messages);
            if !texts.is_empty() {
                let texts = Value::Array(texts.into_iter().map(Value::String).collect());
                payload.insert("messages".into(), redactor.redact(&texts));
            }
        }

        let mut event = Event::new(EventType::LlmInvoke, format!("llm_{}_{}", request.provider, request.model));
        event.payload = payload;
        sink.track(event);
    }
}

impl ResponseInspector<ChatRequest, Value> for ToolUseInspector {
    fn inspect(&self, request: &ChatRequest, response: &Value) -> Vec<RequestContext> {
        self.record(request);
        let tools = extract_tool_calls(response);
        if !tools.is_empty() {
            debug!(model = %request.model, tools = ?tools, "model requested tools");
        }
        tools
            .into_iter()
            .map(|name| RequestContext::action(ActionType::ToolCall, name))
            .collect()
    }
}

/// Gate `site` on the model id and on every tool its responses request.
///
/// Pass a redactor to include (redacted) message text in the `LlmInvoke`
/// event.
pub fn model_interceptor(
    site: Arc<CallSite<ChatRequest, Value>>,
    enforcer: Arc<Enforcer>,
    redactor: Option<PiiRedactor>,
) -> Interceptor<ChatRequest, Value> {
    let inspector = ToolUseInspector::new(enforcer.sink().cloned(), redactor);
    Interceptor::new(site, enforcer, |request: &ChatRequest| {
        Some(
            RequestContext::action(ActionType::LlmCall, request.model.clone())
                .with_attribute("provider", request.provider.clone()),
        )
    })
    .with_inspector(inspector)
}
