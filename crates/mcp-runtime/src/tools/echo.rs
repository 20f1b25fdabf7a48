//! Tool: echo. Returns its `text` argument unchanged.

use serde_json::{Map, Value};

use super::Tool;
use crate::types::{InputSchema, McpResult, ToolCallResult};

pub fn tool() -> McpResult<Tool> {
    Tool::new(
        "echo",
        "Echo the given text back to the caller",
        InputSchema::object()
            .required_property("text", "string", "Text to echo")
            .deny_additional(),
        execute,
    )
}

async fn execute(args: Map<String, Value>) -> anyhow::Result<ToolCallResult> {
    let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
    Ok(ToolCallResult::text(text))
}
