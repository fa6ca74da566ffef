//! The tool abstraction bound into agent drivers.
//!
//! A tool is anything with a name, a JSON-schema argument contract and an
//! async invocation. Remote tool-plane adapters and local editor/chart
//! tools implement the same trait, so the agent driver stays polymorphic
//! over `{list, call(name, args)}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::messages::MessageContent;

/// Input handed to [`Tool::call`].
///
/// Models produce structured arguments; convenience callers may pass a bare
/// string, which tools interpret as their primary parameter.
#[derive(Debug, Clone)]
pub enum ToolInput {
    /// A bare string argument.
    String(String),
    /// Structured arguments conforming to the tool's schema.
    Structured(Value),
}

impl ToolInput {
    /// View the input as a JSON value (strings become `{"input": s}`).
    pub fn as_args(&self) -> Value {
        match self {
            ToolInput::String(s) => serde_json::json!({ "input": s }),
            ToolInput::Structured(v) => v.clone(),
        }
    }

    /// Fetch a string field from structured input, or the bare string for
    /// the primary parameter name.
    pub fn str_field(&self, name: &str) -> Option<String> {
        match self {
            ToolInput::String(s) if name == "input" => Some(s.clone()),
            ToolInput::String(_) => None,
            ToolInput::Structured(v) => v
                .get(name)
                .and_then(Value::as_str)
                .map(ToString::to_string),
        }
    }

    /// Fetch an integer field from structured input.
    pub fn int_field(&self, name: &str) -> Option<i64> {
        match self {
            ToolInput::String(_) => None,
            ToolInput::Structured(v) => v.get(name).and_then(Value::as_i64),
        }
    }
}

impl From<Value> for ToolInput {
    fn from(v: Value) -> Self {
        ToolInput::Structured(v)
    }
}

impl From<&str> for ToolInput {
    fn from(s: &str) -> Self {
        ToolInput::String(s.to_string())
    }
}

/// A tool declaration in the form chat models consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name declared to the model.
    pub name: String,
    /// Natural-language description.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// An invocable tool.
#[async_trait]
pub trait Tool: std::marker::Send + Sync {
    /// The name the model calls this tool by.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn args_schema(&self) -> Value;

    /// Invoke the tool. The result is message content so tools may return
    /// images alongside text (chart review).
    async fn call(&self, input: ToolInput) -> Result<MessageContent>;

    /// The declaration handed to chat models.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.args_schema(),
        }
    }
}

/// Definitions for a whole toolset.
pub fn definitions(tools: &[std::sync::Arc<dyn Tool>]) -> Vec<ToolDefinition> {
    tools.iter().map(|t| t.definition()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input"
        }
        fn args_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "input": { "type": "string" } },
                "required": ["input"]
            })
        }
        async fn call(&self, input: ToolInput) -> Result<MessageContent> {
            Ok(MessageContent::text(
                input.str_field("input").unwrap_or_default(),
            ))
        }
    }

    #[tokio::test]
    async fn call_with_string_input() {
        let out = Echo.call(ToolInput::from("hi")).await.unwrap();
        assert_eq!(out.as_text(), "hi");
    }

    #[test]
    fn definition_carries_schema() {
        let def = Echo.definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["required"][0], "input");
    }
}
