//! Prompt registry and the built-in demo prompts.

pub mod registry;
pub mod review;
pub mod summarize;

pub use registry::{Prompt, PromptHandler, PromptRegistry};

use crate::types::McpResult;

pub fn builtins() -> McpResult<Vec<Prompt>> {
    Ok(vec![summarize::prompt()?, review::prompt()?])
}
