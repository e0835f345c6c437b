//! Reassembly of a streamed turn: fragments in, turn-complete responses out.
//!
//! Pipeline per turn, strictly in arrival order:
//! `StreamAssembler` (with its `ToolCallReconstructor`) → `TrailingUsage`
//! → `cumulative_usage`.

pub mod aggregate;
pub mod assemble;
pub mod lookahead;
pub mod reconstruct;
pub mod usage;

/// Finish reason a provider uses to request tool execution.
pub const FINISH_TOOL_CALLS: &str = "tool_calls";

pub use aggregate::{aggregate, MessageAggregator};
pub use assemble::{assemble_complete, flatten_content, StreamAssembler};
pub use lookahead::{is_usage_only, TrailingUsage};
pub use reconstruct::ToolCallReconstructor;
pub use usage::cumulative_usage;
