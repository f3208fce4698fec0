//! Tool trait: the abstraction over local actions.
//!
//! Tools are what let the model act on the host: run a shell command,
//! switch a light. The [`ToolRegistry`] is the fixed dispatch table the
//! engine resolves action names against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (on failure, the text the summarizer explains)
    pub output: String,

    /// Underlying error detail when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// A failed result whose output text describes the failure.
    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Fold a tool error into a failed result.
    pub fn from_error(err: &ToolError) -> Self {
        Self::failed(err.to_string(), err.to_string())
    }

    /// Attach the call ID this result answers.
    pub fn for_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}

/// The core Tool trait.
///
/// Each action implements this trait and is registered in the
/// [`ToolRegistry`]. Besides the structured function-calling surface, a tool
/// may answer to textual `Action: <Alias>[<argument>]` markers.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique function name of this tool (e.g., "executeCommand").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Names this tool answers to in textual reasoning markers.
    fn marker_aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Convert the bracketed argument of a textual marker into arguments.
    ///
    /// `None` means the text cannot be used directly and the model has to
    /// be asked for a structured call instead.
    fn parse_marker_argument(&self, _raw: &str) -> Option<serde_json::Value> {
        None
    }

    /// A one-line human description of what a call with these arguments does.
    fn describe_call(&self, arguments: &serde_json::Value) -> String {
        format!("{} {}", self.name(), arguments)
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The engine uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Resolve structured and textual action names to a tool
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by its exact function name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Resolve an action name: exact function name first, then a
    /// case-insensitive match against marker aliases.
    pub fn resolve(&self, action: &str) -> Option<&dyn Tool> {
        if let Some(tool) = self.get(action) {
            return Some(tool);
        }
        self.tools
            .values()
            .find(|t| {
                t.marker_aliases()
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(action))
            })
            .map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        fn marker_aliases(&self) -> &'static [&'static str] {
            &["Say"]
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn resolve_by_alias_ignores_case() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.resolve("say").map(|t| t.name()), Some("echo"));
        assert_eq!(registry.resolve("SAY").map(|t| t.name()), Some("echo"));
        assert_eq!(registry.resolve("echo").map(|t| t.name()), Some("echo"));
        assert!(registry.resolve("Search").is_none());
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn default_describe_call_includes_arguments() {
        let desc = EchoTool.describe_call(&serde_json::json!({"text": "hi"}));
        assert!(desc.starts_with("echo "));
        assert!(desc.contains("hi"));
    }

    #[test]
    fn failed_result_keeps_error_detail() {
        let result = ToolResult::from_error(&ToolError::InvalidArguments("missing 'command'".into()))
            .for_call("call_9");
        assert!(!result.success);
        assert_eq!(result.call_id, "call_9");
        assert!(result.error.as_deref().unwrap().contains("missing 'command'"));
    }
}
