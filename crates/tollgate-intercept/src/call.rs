//! Call-level gates: tool execution and function execution.
//!
//! These key on the name of what is being run, independent of any network
//! transport underneath.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tollgate_contracts::{
    error::TollgateResult,
    request::{ActionType, RequestContext},
};
use tollgate_core::{
    enforcer::Enforcer,
    intercept::{CallSite, Interceptor},
};

/// One tool invocation by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// One function execution inside a multi-agent framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Executing agent, if the framework names one.
    pub agent: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            agent: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn by_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// `"<agent>/<function>"`, or just the function name.
    pub fn target(&self) -> String {
        match &self.agent {
            Some(agent) => format!("{}/{}", agent, self.name),
            None => self.name.clone(),
        }
    }
}

/// Gate `site` on the tool name.
pub fn tool_interceptor<R: 'static>(site: Arc<CallSite<ToolCall, R>>, enforcer: Arc<Enforcer>) -> Interceptor<ToolCall, R> {
    Interceptor::new(site, enforcer, |call: &ToolCall| {
        Some(RequestContext::action(ActionType::ToolCall, call.name.clone()))
    })
}

/// Gate `site` on `agent/function`.
pub fn function_interceptor<R: 'static>(
    site: Arc<CallSite<FunctionCall, R>>,
    enforcer: Arc<Enforcer>,
) -> Interceptor<FunctionCall, R> {
    Interceptor::new(site, enforcer, |call: &FunctionCall| {
        let mut ctx = RequestContext::action(ActionType::FunctionCall, call.target());
        if let Some(agent) = &call.agent {
            ctx = ctx.with_attribute("agent", agent.clone());
        }
        Some(ctx.with_attribute("function", call.name.clone()))
    })
}

/// Wrap `f` so every call is checked first.
///
/// The action and target are fixed at wrap time; a denied call under
/// `Block` never reaches `f`.
pub fn gate_fn<A, R, F>(
    enforcer: Arc<Enforcer>,
    action: impl Into<ActionType>,
    target: impl Into<String>,
    f: F,
) -> impl Fn(A) -> TollgateResult<R> + Send + Sync
where
    F: Fn(A) -> R + Send + Sync,
{
    let ctx = RequestContext::action(action, target);
    move |args: A| {
        enforcer.check(&ctx)?;
        Ok(f(args))
    }
}

/// A framework's name → implementation table.
pub type FunctionMap = HashMap<String, Arc<dyn Fn(&Value) -> TollgateResult<Value> + Send + Sync>>;

/// Gate every entry of `functions` as `function_call` on
/// `"<agent>/<name>"` (or `"<name>"` with no agent).
pub fn gate_function_map(enforcer: Arc<Enforcer>, agent: Option<&str>, functions: FunctionMap) -> FunctionMap {
    functions
        .into_iter()
        .map(|(name, inner)| {
            let target = match agent {
                Some(agent) => format!("{}/{}", agent, name),
                None => name.clone(),
            };
            let ctx = RequestContext::action(ActionType::FunctionCall, target);
            let enforcer = Arc::clone(&enforcer);
            let gated: Arc<dyn Fn(&Value) -> TollgateResult<Value> + Send + Sync> = Arc::new(move |args: &Value| {
                enforcer.check(&ctx)?;
                inner(args)
            });
            (name, gated)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn function_target_includes_agent() {
        let call = FunctionCall::new("delete_db", json!({})).by_agent("assistant");
        assert_eq!(call.target(), "assistant/delete_db");
        assert_eq!(FunctionCall::new("delete_db", json!({})).target(), "delete_db");
    }

    #[test]
    fn permissive_gate_fn_passes_through() {
        let double = gate_fn(Arc::new(Enforcer::permissive()), "function_call", "double", |x: i32| x * 2);
        assert_eq!(double(21).unwrap(), 42);
    }
}
