use async_trait::async_trait;
use serde_json::Value;

use crate::types::{ToolContext, ToolDefinition};

/// A tool's execution handler. Consumers implement this for each tool.
///
/// `Err` carries a message for the model, not a failure of the loop.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: &Value, context: &ToolContext) -> Result<String, String>;
}

/// A tool definition: schema for the model + handler for execution.
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Hand the tool's output straight back to the caller instead of
    /// resubmitting it to the model.
    pub return_direct: bool,
    pub(crate) handler: Box<dyn ToolHandler>,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            return_direct: false,
            handler: Box::new(handler),
        }
    }

    pub fn with_return_direct(mut self, return_direct: bool) -> Self {
        self.return_direct = return_direct;
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("return_direct", &self.return_direct)
            .finish_non_exhaustive()
    }
}
