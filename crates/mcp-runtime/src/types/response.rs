//! MCP response types for tools, resources, and prompts.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::{McpError, McpResult};
use super::schema::InputSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: ResourceContent },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: None,
        }
    }

    pub fn json(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|e| e.to_string());
        Self::text(text)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Unwrap the content, turning an error-flagged result into a
    /// `TOOL_EXECUTION_ERROR`.
    pub fn into_content(self) -> McpResult<Vec<ToolContent>> {
        if self.is_error() {
            return Err(McpError::ToolExecution(joined_text(&self.content)));
        }
        Ok(self.content)
    }
}

fn joined_text(content: &[ToolContent]) -> String {
    content
        .iter()
        .filter_map(ToolContent::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wire shape of a registered tool as it appears in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolListResult {
    pub tools: Vec<ToolDefinition>,
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContent {
    pub fn text(uri: impl Into<String>, mime_type: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.map(str::to_string),
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Binary contents, base64-encoded for the wire.
    pub fn blob(uri: impl Into<String>, mime_type: Option<&str>, bytes: &[u8]) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.map(str::to_string),
            text: None,
            blob: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }

    pub fn decode_blob(&self) -> McpResult<Option<Vec<u8>>> {
        self.blob
            .as_deref()
            .map(|b| {
                base64::engine::general_purpose::STANDARD
                    .decode(b)
                    .map_err(|e| {
                    McpError::ParseError(format!("invalid blob for {}: {e}", self.uri))
                })
            })
            .transpose()
    }
}

/// Wire shape of a registered resource as it appears in `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceListResult {
    pub resources: Vec<ResourceDefinition>,
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContent>,
    #[serde(default, rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ReadResourceResult {
    pub fn new(contents: Vec<ResourceContent>) -> Self {
        Self {
            contents,
            is_error: None,
        }
    }

    pub fn error(uri: &str, message: impl Into<String>) -> Self {
        Self {
            contents: vec![ResourceContent::text(uri, Some("text/plain"), message)],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    pub fn into_contents(self) -> McpResult<Vec<ResourceContent>> {
        if self.is_error() {
            let message = self
                .contents
                .iter()
                .filter_map(|c| c.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(McpError::InternalError(message));
        }
        Ok(self.contents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: false,
        }
    }
}

/// Wire shape of a registered prompt as it appears in `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptListResult {
    pub prompts: Vec<PromptDefinition>,
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: ToolContent,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: ToolContent::text(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptGetResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
    #[serde(default, rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl PromptGetResult {
    pub fn new(description: Option<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            description,
            messages,
            is_error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            description: None,
            messages: vec![PromptMessage::user(message)],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Unwrap the messages, turning an error-flagged result into a
    /// `PROMPT_EXECUTION_ERROR`.
    pub fn into_messages(self) -> McpResult<Vec<PromptMessage>> {
        if self.is_error() {
            let content: Vec<ToolContent> = self.messages.into_iter().map(|m| m.content).collect();
            return Err(McpError::PromptExecution(joined_text(&content)));
        }
        Ok(self.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flagged_tool_result_becomes_execution_error() {
        let err = ToolCallResult::error("disk full").into_content().unwrap_err();
        assert_eq!(err.code(), -32004);
        assert!(err.to_string().contains("disk full"));

        let ok = ToolCallResult::text("hi").into_content().unwrap();
        assert_eq!(ok[0].as_text(), Some("hi"));
    }

    #[test]
    fn flagged_prompt_result_becomes_execution_error() {
        let err = PromptGetResult::error("template broke").into_messages().unwrap_err();
        assert_eq!(err.code(), -32005);
    }

    #[test]
    fn blob_contents_are_base64() {
        let content =
            ResourceContent::blob("mem://raw", Some("application/octet-stream"), &[0, 1, 255]);
        assert_eq!(content.blob.as_deref(), Some("AAH/"));
        assert_eq!(content.decode_blob().unwrap(), Some(vec![0, 1, 255]));
    }

    #[test]
    fn is_error_flag_is_omitted_on_success() {
        let value = serde_json::to_value(ReadResourceResult::new(vec![])).unwrap();
        assert!(value.get("isError").is_none());
        let value = serde_json::to_value(ReadResourceResult::error("x://y", "boom")).unwrap();
        assert_eq!(value["isError"], serde_json::json!(true));
    }
}
