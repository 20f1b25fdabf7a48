//! Object input schemas for tools and argument validation against them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::{McpError, McpResult};
use super::request::json_type_name;

/// The subset of JSON Schema a tool declares for its arguments: an object
/// with named properties and a set of required names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        default,
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl InputSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Map::new(),
            required: Vec::new(),
            additional_properties: None,
        }
    }

    /// Declare an optional property of the given JSON type.
    pub fn property(mut self, name: &str, json_type: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": json_type, "description": description }),
        );
        self
    }

    /// Declare a property that must be present in every call.
    pub fn required_property(self, name: &str, json_type: &str, description: &str) -> Self {
        let mut schema = self.property(name, json_type, description);
        if !schema.required.iter().any(|r| r == name) {
            schema.required.push(name.to_string());
        }
        schema
    }

    /// Reject arguments not named in `properties`.
    pub fn deny_additional(mut self) -> Self {
        self.additional_properties = Some(false);
        self
    }

    /// Check call arguments against this schema.
    pub fn validate(&self, arguments: &Map<String, Value>) -> McpResult<()> {
        for name in &self.required {
            match arguments.get(name) {
                None | Some(Value::Null) => {
                    return Err(McpError::InvalidParams(format!(
                        "missing required argument '{name}'"
                    )))
                }
                Some(_) => {}
            }
        }

        for (name, value) in arguments {
            let Some(declared) = self.properties.get(name) else {
                if self.additional_properties == Some(false) {
                    return Err(McpError::InvalidParams(format!(
                        "unexpected argument '{name}'"
                    )));
                }
                continue;
            };
            if let Some(expected) = declared.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(McpError::InvalidParams(format!(
                        "argument '{name}' must be {expected}, got {}",
                        json_type_name(value)
                    )));
                }
            }
        }

        Ok(())
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        // Unknown or composite types are not checked here.
        _ => true,
    }
}
