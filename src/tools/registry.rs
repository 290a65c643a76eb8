use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

/// Whether a call to this tool must pass the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalKind {
    AutoApprove,
    Ask,
}

/// Advisory impact classification, surfaced to the approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// What a tool's execution contract hands back: text for the model, plus
/// optional host-only text that is never sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply {
    pub text: String,
    pub private_text: Option<String>,
}

impl ToolReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            private_text: None,
        }
    }

    pub fn with_private_text(mut self, text: impl Into<String>) -> Self {
        self.private_text = Some(text.into());
        self
    }
}

pub type ToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolReply, String>> + Send>>
        + Send
        + Sync,
>;

/// Wraps a plain async closure into the boxed handler shape.
pub fn handler_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolReply, String>> + Send + 'static,
{
    Box::new(move |args| Box::pin(f(args)))
}

/// One registered tool. Immutable after registration except `enabled`,
/// which is toggled per category through the registry.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub usage_example: String,
    pub approval: ApprovalKind,
    pub risk: RiskLevel,
    pub category: String,
    pub enabled: bool,
    pub parameters_schema: Value,
    pub handler: Option<ToolHandler>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage_example: String::new(),
            approval: ApprovalKind::Ask,
            risk: RiskLevel::Medium,
            category: "general".to_string(),
            enabled: true,
            parameters_schema: json!({"type": "object"}),
            handler: None,
        }
    }

    pub fn with_usage_example(mut self, example: impl Into<String>) -> Self {
        self.usage_example = example.into();
        self
    }

    pub fn with_approval(mut self, approval: ApprovalKind) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameters_schema = schema;
        self
    }

    pub fn with_handler(mut self, handler: ToolHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// Catalog of available tools. Lookup is by exact name only.
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a definition. A definition without an execution contract is
    /// logged and skipped, never stored.
    pub fn register(&mut self, definition: ToolDefinition) {
        if definition.handler.is_none() {
            warn!(
                tool = %definition.name,
                "skipping tool registration: no execution contract"
            );
            return;
        }
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn all(&self) -> Vec<&ToolDefinition> {
        self.tools.values().collect()
    }

    pub fn enabled(&self) -> Vec<&ToolDefinition> {
        self.tools.values().filter(|t| t.enabled).collect()
    }

    pub fn set_category_enabled(&mut self, category: &str, enabled: bool) {
        for tool in self.tools.values_mut() {
            if tool.category == category {
                tool.enabled = enabled;
            }
        }
    }

    /// Enabled tools in the wire declaration format advertised to the model.
    /// The usage example rides along in the description.
    pub fn definitions_for_request(&self) -> Vec<Value> {
        let mut tools: Vec<&ToolDefinition> = self.enabled();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
            .iter()
            .map(|tool| {
                let description = if tool.usage_example.is_empty() {
                    tool.description.clone()
                } else {
                    format!("{}\nExample: {}", tool.description, tool.usage_example)
                };
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": description,
                        "parameters": tool.parameters_schema,
                    }
                })
            })
            .collect()
    }

    /// Validates an argument map against the tool's Draft-7 schema.
    pub fn validate_arguments(&self, tool_name: &str, arguments: &Value) -> Result<(), String> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| format!("Tool '{}' not found", tool_name))?;

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&tool.parameters_schema)
            .map_err(|e| format!("Invalid tool schema: {}", e))?;

        if let Err(errors) = schema.validate(arguments) {
            let messages: Vec<String> = errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
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

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new("echo", "Echo back the provided text")
            .with_approval(ApprovalKind::AutoApprove)
            .with_risk(RiskLevel::Low)
            .with_category("utility")
            .with_schema(json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
                "additionalProperties": false
            }))
            .with_handler(handler_fn(|args| async move {
                let text = args
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "Missing required argument: text".to_string())?;
                Ok(ToolReply::text(text))
            }))
    }

    #[test]
    fn register_skips_definition_without_contract() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition::new("ghost", "no handler"));
        assert!(registry.get("ghost").is_none());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn lookup_is_exact_name_only() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("Echo").is_none());
        assert!(registry.get("ech").is_none());
    }

    #[test]
    fn category_toggle_controls_enabled_set() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        registry.register(
            ToolDefinition::new("fetch", "HTTP fetch")
                .with_category("network")
                .with_handler(handler_fn(|_| async { Ok(ToolReply::text("ok")) })),
        );

        assert_eq!(registry.enabled().len(), 2);
        registry.set_category_enabled("network", false);
        let enabled: Vec<&str> = registry.enabled().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(enabled, vec!["echo"]);
        registry.set_category_enabled("network", true);
        assert_eq!(registry.enabled().len(), 2);
    }

    #[test]
    fn advertisement_uses_wire_format() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool().with_usage_example("echo(text=\"hi\")"));
        let defs = registry.definitions_for_request();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "echo");
        let description = defs[0]["function"]["description"].as_str().unwrap();
        assert!(description.contains("Example: echo(text=\"hi\")"));
        assert!(defs[0]["function"]["parameters"]["required"][0] == "text");
    }

    #[test]
    fn disabled_tools_are_not_advertised() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        registry.set_category_enabled("utility", false);
        assert!(registry.definitions_for_request().is_empty());
    }

    #[test]
    fn validates_arguments_against_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        assert!(registry
            .validate_arguments("echo", &json!({"text": "hi"}))
            .is_ok());
        assert!(registry.validate_arguments("echo", &json!({})).is_err());
        assert!(registry
            .validate_arguments("echo", &json!({"text": 42}))
            .is_err());
        assert!(registry
            .validate_arguments("missing", &json!({}))
            .is_err());
    }
}
