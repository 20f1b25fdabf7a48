//! Configuration loading and resolution.
//!
//! Every setting resolves as explicit value, then environment variable, then
//! built-in default.

use std::time::Duration;

use crate::transport::framing::MAX_FRAME_BYTES;
use crate::types::{
    Implementation, ServerCapabilities, SERVER_NAME, SERVER_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

pub const NAME_ENV: &str = "MCP_RUNTIME_NAME";
pub const INSTRUCTIONS_ENV: &str = "MCP_RUNTIME_INSTRUCTIONS";
pub const PROTOCOL_VERSIONS_ENV: &str = "MCP_RUNTIME_PROTOCOL_VERSIONS";
pub const TIMEOUT_ENV: &str = "MCP_RUNTIME_TIMEOUT_MS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INSTRUCTIONS: &str =
    "General-purpose MCP runtime. Call tools/list, resources/list and prompts/list to discover what is available.";

/// Settings shared by the server and client orchestrators.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub server_name: String,
    pub server_version: String,
    pub instructions: Option<String>,
    /// Protocol versions this side accepts; the first is preferred.
    pub supported_versions: Vec<String>,
    pub request_timeout: Duration,
    pub capabilities: ServerCapabilities,
    /// Longest inbound line a stream transport accepts.
    pub max_frame_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_name: SERVER_NAME.to_string(),
            server_version: SERVER_VERSION.to_string(),
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            supported_versions: default_versions(),
            request_timeout: DEFAULT_TIMEOUT,
            capabilities: ServerCapabilities::default_capabilities(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by whatever the environment sets.
    pub fn from_env() -> Self {
        Self {
            server_name: resolve_server_name(None),
            instructions: resolve_instructions(None),
            supported_versions: resolve_protocol_versions(None),
            request_timeout: resolve_timeout(None),
            ..Self::default()
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_supported_versions(mut self, versions: Vec<String>) -> Self {
        if !versions.is_empty() {
            self.supported_versions = versions;
        }
        self
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn server_info(&self) -> Implementation {
        Implementation::new(&self.server_name, &self.server_version)
    }

    /// The version a client asks for during the handshake.
    pub fn preferred_version(&self) -> &str {
        self.supported_versions
            .first()
            .map(String::as_str)
            .unwrap_or(crate::types::MCP_VERSION)
    }
}

fn default_versions() -> Vec<String> {
    SUPPORTED_PROTOCOL_VERSIONS.iter().map(|v| v.to_string()).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Resolve the server name advertised in the handshake.
pub fn resolve_server_name(explicit: Option<&str>) -> String {
    server_name_from(explicit, std::env::var(NAME_ENV).ok())
}

fn server_name_from(explicit: Option<&str>, env: Option<String>) -> String {
    non_empty(explicit.map(str::to_string))
        .or_else(|| non_empty(env))
        .unwrap_or_else(|| SERVER_NAME.to_string())
}

/// Resolve the instructions text returned from `initialize`.
pub fn resolve_instructions(explicit: Option<&str>) -> Option<String> {
    instructions_from(explicit, std::env::var(INSTRUCTIONS_ENV).ok())
}

fn instructions_from(explicit: Option<&str>, env: Option<String>) -> Option<String> {
    non_empty(explicit.map(str::to_string))
        .or_else(|| non_empty(env))
        .or_else(|| Some(DEFAULT_INSTRUCTIONS.to_string()))
}

/// Resolve the supported protocol versions from a comma-separated list.
pub fn resolve_protocol_versions(explicit: Option<&str>) -> Vec<String> {
    versions_from(explicit, std::env::var(PROTOCOL_VERSIONS_ENV).ok())
}

fn versions_from(explicit: Option<&str>, env: Option<String>) -> Vec<String> {
    let raw = non_empty(explicit.map(str::to_string)).or_else(|| non_empty(env));
    let parsed: Vec<String> = raw
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if parsed.is_empty() {
        default_versions()
    } else {
        parsed
    }
}

/// Resolve the per-request timeout in milliseconds.
pub fn resolve_timeout(explicit: Option<u64>) -> Duration {
    timeout_from(explicit, std::env::var(TIMEOUT_ENV).ok())
}

fn timeout_from(explicit: Option<u64>, env: Option<String>) -> Duration {
    if let Some(ms) = explicit.filter(|ms| *ms > 0) {
        return Duration::from_millis(ms);
    }
    match env.as_deref().map(str::trim).map(str::parse::<u64>) {
        Some(Ok(ms)) if ms > 0 => Duration::from_millis(ms),
        Some(_) => {
            tracing::warn!(
                "Ignoring invalid {TIMEOUT_ENV}; using {}ms",
                DEFAULT_TIMEOUT.as_millis()
            );
            DEFAULT_TIMEOUT
        }
        None => DEFAULT_TIMEOUT,
    }
}
