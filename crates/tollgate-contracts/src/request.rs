//! Request context: the attributes rule conditions can see.
//!
//! Interception adapters build one `RequestContext` per guarded call. The
//! evaluator only ever reads it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of outbound action being gated.
///
/// Rules refer to these by their string form, e.g. `Action::"tool_call"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Outbound HTTP request.
    Http,
    /// Agent tool execution.
    ToolCall,
    /// Model invocation.
    LlmCall,
    /// Function execution inside an agent framework.
    FunctionCall,
    /// Anything else a host application wants to gate.
    #[serde(untagged)]
    Custom(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::Http => "http",
            ActionType::ToolCall => "tool_call",
            ActionType::LlmCall => "llm_call",
            ActionType::FunctionCall => "function_call",
            ActionType::Custom(kind) => kind.as_str(),
        }
    }
}

impl From<&str> for ActionType {
    fn from(kind: &str) -> Self {
        match kind {
            "http" => ActionType::Http,
            "tool_call" => ActionType::ToolCall,
            "llm_call" => ActionType::LlmCall,
            "function_call" => ActionType::FunctionCall,
            other => ActionType::Custom(other.to_string()),
        }
    }
}

impl From<String> for ActionType {
    fn from(kind: String) -> Self {
        ActionType::from(kind.as_str())
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a rule condition may inspect for one guarded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// What kind of action is about to run.
    pub action_type: ActionType,
    /// Hostname+method, tool name, model id, or function name.
    pub target: String,
    /// Free-form extension attributes (`hostname`, `method`, ...).
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    /// Context for a call-level action (tool, function, model).
    pub fn action(action_type: impl Into<ActionType>, target: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            target: target.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Context for an outbound HTTP request.
    ///
    /// `url` may be a full URL or a bare hostname. The target is
    /// `"<METHOD> <hostname>"` and the `hostname`, `method`, `url` and (for
    /// full URLs) `path` attributes are populated.
    pub fn http(url: &str, method: &str) -> Self {
        let method = method.to_ascii_uppercase();
        let (hostname, path) = match url::Url::parse(url) {
            Ok(parsed) if parsed.host_str().is_some() => (
                parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
                Some(parsed.path().to_string()),
            ),
            _ => (url.trim().to_ascii_lowercase(), None),
        };

        let mut ctx = Self::action(ActionType::Http, format!("{} {}", method, hostname))
            .with_attribute("hostname", hostname)
            .with_attribute("method", method)
            .with_attribute("url", url);
        if let Some(path) = path {
            ctx = ctx.with_attribute("path", path);
        }
        ctx
    }

    /// Add or replace an extension attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute by name.
    ///
    /// `action_type` and `target` resolve to the built-in fields so rules can
    /// compare against them like any other attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "action_type" => Some(self.action_type.as_str()),
            "target" => Some(self.target.as_str()),
            _ => self.attributes.get(key).map(String::as_str),
        }
    }
}
