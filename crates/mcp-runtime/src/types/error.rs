//! Error types and JSON-RPC error codes for the MCP runtime.

use std::time::Duration;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes.
pub mod mcp_error_codes {
    pub const INVALID_TOOL: i32 = -32000;
    pub const INVALID_RESOURCE_URI: i32 = -32001;
    pub const INVALID_PROMPT: i32 = -32002;
    pub const RESOURCE_NOT_FOUND: i32 = -32003;
    pub const TOOL_EXECUTION_ERROR: i32 = -32004;
    pub const PROMPT_EXECUTION_ERROR: i32 = -32005;
}

/// Which registry an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tool,
    Resource,
    Prompt,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Tool => f.write_str("tool"),
            EntryKind::Resource => f.write_str("resource"),
            EntryKind::Prompt => f.write_str("prompt"),
        }
    }
}

/// Failures of the byte/frame channel underneath a session.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The peer went away cleanly (EOF, stream closed).
    #[error("Transport disconnected")]
    Disconnected,

    /// The local side already closed the transport.
    #[error("Transport closed")]
    Closed,

    /// The stream ended in the middle of a frame.
    #[error("Truncated frame at end of stream ({0} bytes)")]
    Truncated(usize),

    /// A frame grew past the configured limit without a newline.
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// A complete frame arrived but could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// A frame that was read completely but failed envelope validation.
///
/// Always reported as `PARSE_ERROR`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DecodeError {
    pub message: String,
    /// The id, when one could be recovered from the payload.
    pub id: Option<RequestId>,
    /// Whether the payload carried a `method` field.
    pub has_method: bool,
}

impl DecodeError {
    /// Not JSON at all: nothing can be recovered.
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            id: None,
            has_method: false,
        }
    }

    pub fn malformed(message: impl Into<String>, id: Option<RequestId>, has_method: bool) -> Self {
        Self {
            message: message.into(),
            id,
            has_method,
        }
    }

    pub fn code(&self) -> i32 {
        error_codes::PARSE_ERROR
    }

    /// The id to answer with, if this frame was clearly meant as a request.
    pub fn reply_id(&self) -> Option<&RequestId> {
        if self.has_method {
            self.id.as_ref()
        } else {
            None
        }
    }

    /// Neither an id nor a method: nothing identifies the frame.
    pub fn is_unrecoverable(&self) -> bool {
        self.id.is_none() && !self.has_method
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError::new(id, self.code(), format!("Parse error: {}", self.message))
    }
}

/// All errors that can occur in the MCP runtime.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Invalid tool name: {0}")]
    InvalidTool(String),

    #[error("Invalid resource uri: {0}")]
    InvalidResourceUri(String),

    #[error("Invalid prompt name: {0}")]
    InvalidPrompt(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Prompt execution error: {0}")]
    PromptExecution(String),

    /// A {kind} with this key is already registered and replacement was not requested.
    #[error("{kind} already registered: {name}")]
    AlreadyRegistered { kind: EntryKind, name: String },

    /// The peer answered with an error object.
    #[error("Remote error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcErrorObject),

    #[error("Request {id} ({method}) timed out after {}ms", .after.as_millis())]
    Timeout {
        id: RequestId,
        method: String,
        after: Duration,
    },

    #[error("Disconnected while waiting for a response")]
    Disconnected,

    #[error("Session closed")]
    SessionClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) | McpError::AlreadyRegistered { .. } => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) => INTERNAL_ERROR,
            McpError::InvalidTool(_) => INVALID_TOOL,
            McpError::InvalidResourceUri(_) => INVALID_RESOURCE_URI,
            McpError::InvalidPrompt(_) => INVALID_PROMPT,
            McpError::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            McpError::ToolExecution(_) => TOOL_EXECUTION_ERROR,
            McpError::PromptExecution(_) => PROMPT_EXECUTION_ERROR,
            McpError::Remote(obj) => obj.code,
            McpError::Transport(TransportError::Decode(e)) => e.code(),
            McpError::Timeout { .. }
            | McpError::Disconnected
            | McpError::SessionClosed
            | McpError::Transport(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            McpError::Remote(obj) => obj.clone(),
            other => JsonRpcErrorObject {
                code: other.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: self.to_error_object(),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
