pub mod eligibility;
pub mod handler;
pub mod manager;
pub mod registry;

pub use eligibility::{DefaultToolEligibility, ToolExecutionEligibility};
pub use handler::{ToolDef, ToolHandler};
pub use manager::{ToolCallingManager, ToolExecutionResult, ToolExecutor, FINISH_RETURN_DIRECT};
pub use registry::ToolRegistry;
