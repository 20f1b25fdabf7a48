//! MCP request parameter types, one per built-in method.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{McpError, McpResult};

/// Built-in method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReadParams {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptGetParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Decode method params into their typed shape.
///
/// A missing `params` member is treated as an empty object so that methods
/// whose fields are all optional accept bare requests.
pub fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> McpResult<T> {
    let value = match params {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(v @ Value::Object(_)) => v,
        Some(other) => {
            return Err(McpError::InvalidParams(format!(
                "{method} params must be an object, got {}",
                json_type_name(&other)
            )))
        }
    };
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(format!("{method}: {e}")))
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_params_become_empty_object() {
        let list: ListParams = parse_params(methods::TOOLS_LIST, None).unwrap();
        assert_eq!(list.cursor, None);
    }

    #[test]
    fn missing_required_field_is_invalid_params() {
        let err = parse_params::<ToolCallParams>(methods::TOOLS_CALL, Some(json!({})))
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn non_object_params_are_rejected() {
        let err = parse_params::<ResourceReadParams>(methods::RESOURCES_READ, Some(json!([1])))
            .unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn prompt_arguments_must_be_strings() {
        let err = parse_params::<PromptGetParams>(
            methods::PROMPTS_GET,
            Some(json!({ "name": "p", "arguments": { "n": 3 } })),
        )
        .unwrap_err();
        assert_eq!(err.code(), -32602);
    }
}
