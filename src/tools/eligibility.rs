use crate::types::{ChatOptions, ChatResponse};

/// Decides whether a resolved response should be handed to the tool executor.
pub trait ToolExecutionEligibility: Send + Sync {
    fn is_tool_execution_required(&self, options: &ChatOptions, response: &ChatResponse) -> bool;
}

/// Internal execution enabled and at least one generation asks for tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultToolEligibility;

impl ToolExecutionEligibility for DefaultToolEligibility {
    fn is_tool_execution_required(&self, options: &ChatOptions, response: &ChatResponse) -> bool {
        options.is_internal_tool_execution_enabled() && response.has_tool_calls()
    }
}
