use serde_json::Value;

use super::handler::{ToolDef, ToolHandler};
use crate::types::{ToolContext, ToolDefinition};

/// Catalog of available tools. Stores definitions, provides schemas and
/// looks up handlers by name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool whose output goes back to the model.
    pub fn add(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.register(ToolDef::new(name, description, input_schema, handler))
    }

    /// Register a fully configured tool. A later tool with the same name
    /// replaces the earlier one.
    pub fn register(mut self, tool: ToolDef) -> Self {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
        self
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDef::definition).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Run a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: &Value,
        context: &ToolContext,
    ) -> Result<String, String> {
        let tool = self
            .get(name)
            .ok_or_else(|| format!("unknown tool: {name}"))?;
        tool.handler.call(input, context).await
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
