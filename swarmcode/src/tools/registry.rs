use crate::tools::permissions::PermissionRequest;
use crate::tools::types::{ToolConfig, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Describe the side effect this call would have, if any.
    /// Called after argument validation and before `execute`.
    fn permission_request(&self, _params: &Value, _context: &ToolContext) -> Option<PermissionRequest> {
        None
    }

    /// Run the tool. Expected failures come back as `ToolResult::error`.
    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
    validator: Option<Validator>,
}

/// Name → tool lookup with compiled argument schemas
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    config: ToolConfig,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_config(ToolConfig::default())
    }

    pub fn with_config(config: ToolConfig) -> Self {
        ToolRegistry {
            tools: HashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let definition = tool.definition();
        let schema = definition.input_schema.to_json_schema();
        let validator = match jsonschema::validator_for(&schema) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!(
                    "[TOOLS] Schema for '{}' does not compile, arguments will not be validated: {}",
                    definition.name,
                    e
                );
                None
            }
        };
        log::debug!("[TOOLS] Registered tool '{}'", definition.name);
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                tool,
                definition,
                validator,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.tool.clone())
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions of every tool the config allows, sorted by name
    pub fn get_tool_definitions(&self, config: &ToolConfig) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| config.is_tool_allowed(&t.definition.name, t.definition.group))
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_allowed(&self, name: &str, config: &ToolConfig) -> bool {
        self.tools
            .get(name)
            .map(|t| config.is_tool_allowed(name, t.definition.group))
            .unwrap_or(false)
    }

    /// Validate arguments against the tool's declared schema
    pub fn validate(&self, name: &str, params: &Value) -> Result<(), String> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| format!("Tool not found: {}", name))?;

        let Some(ref validator) = registered.validator else {
            return Ok(());
        };

        if validator.is_valid(params) {
            return Ok(());
        }

        let messages: Vec<String> = validator
            .iter_errors(params)
            .map(|err| err.to_string())
            .collect();
        Err(format!(
            "Invalid arguments for {}: {}",
            name,
            messages.join("; ")
        ))
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
    use crate::tools::types::{PropertySchema, ToolGroup, ToolInputSchema, ToolProfile};
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            let mut properties = HashMap::new();
            properties.insert("text".to_string(), PropertySchema::string("Text to echo"));
            properties.insert("times".to_string(), PropertySchema::integer("Repeat count"));
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echo text".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["text".to_string()],
                },
                group: ToolGroup::System,
            }
        }

        async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
            ToolResult::success(params["text"].as_str().unwrap_or_default())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn test_validate_accepts_matching_arguments() {
        assert!(registry().validate("echo", &json!({"text": "hi", "times": 2})).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let registry = registry();
        let missing = registry.validate("echo", &json!({})).unwrap_err();
        assert!(missing.starts_with("Invalid arguments for echo"));
        assert!(registry.validate("echo", &json!({"text": "hi", "times": "two"})).is_err());
    }

    #[test]
    fn test_validate_unknown_tool() {
        assert_eq!(
            registry().validate("nope", &json!({})).unwrap_err(),
            "Tool not found: nope"
        );
    }

    #[test]
    fn test_definitions_filtered_by_config() {
        let registry = registry();
        assert!(registry.get_tool_definitions(&ToolConfig::default()).is_empty());
        let full = ToolConfig::with_profile(ToolProfile::Full);
        assert_eq!(registry.get_tool_definitions(&full).len(), 1);
        assert!(registry.is_allowed("echo", &full));
        assert!(!registry.is_allowed("missing", &full));
    }
}
