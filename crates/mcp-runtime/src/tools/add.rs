//! Tool: add. Sums two numbers.

use anyhow::Context;
use serde_json::{json, Map, Value};

use super::Tool;
use crate::types::{InputSchema, McpResult, ToolCallResult};

pub fn tool() -> McpResult<Tool> {
    Tool::new(
        "add",
        "Add two numbers",
        InputSchema::object()
            .required_property("a", "number", "First operand")
            .required_property("b", "number", "Second operand"),
        execute,
    )
}

async fn execute(args: Map<String, Value>) -> anyhow::Result<ToolCallResult> {
    let a = args.get("a").and_then(Value::as_f64).context("'a' is not a number")?;
    let b = args.get("b").and_then(Value::as_f64).context("'b' is not a number")?;
    let sum = a + b;
    if !sum.is_finite() {
        anyhow::bail!("sum of {a} and {b} is not finite");
    }
    Ok(ToolCallResult::json(&json!({ "sum": sum })))
}
