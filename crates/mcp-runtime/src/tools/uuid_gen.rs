//! Tool: uuid. Generates random v4 UUIDs.

use serde_json::{json, Map, Value};

use super::Tool;
use crate::types::{InputSchema, McpResult, ToolCallResult};

const MAX_COUNT: u64 = 100;

pub fn tool() -> McpResult<Tool> {
    Tool::new(
        "uuid",
        "Generate one or more random UUIDs",
        InputSchema::object().property("count", "integer", "How many to generate (default 1)"),
        execute,
    )
}

async fn execute(args: Map<String, Value>) -> anyhow::Result<ToolCallResult> {
    let count = args.get("count").and_then(Value::as_u64).unwrap_or(1);
    if count == 0 || count > MAX_COUNT {
        anyhow::bail!("count must be between 1 and {MAX_COUNT}, got {count}");
    }
    let ids: Vec<String> = (0..count).map(|_| uuid::Uuid::new_v4().to_string()).collect();
    Ok(ToolCallResult::json(&json!({ "uuids": ids })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_requested_count() {
        let args = json!({ "count": 3 }).as_object().cloned().unwrap();
        let result = tool().unwrap().invoke(args).await.unwrap();
        let text = result.content[0].as_text().unwrap().to_string();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["uuids"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_count_is_flagged() {
        let args = json!({ "count": 0 }).as_object().cloned().unwrap();
        let result = tool().unwrap().invoke(args).await.unwrap();
        assert!(result.is_error());
    }
}
