//! Tool registry and the built-in demo tools.

pub mod add;
pub mod echo;
pub mod registry;
pub mod uuid_gen;

pub use registry::{Tool, ToolHandler, ToolRegistry};

use crate::types::McpResult;

/// All built-in tools, in the order they are listed.
pub fn builtins() -> McpResult<Vec<Tool>> {
    Ok(vec![echo::tool()?, add::tool()?, uuid_gen::tool()?])
}
