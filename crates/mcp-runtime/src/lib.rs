//! MCP runtime: JSON-RPC sessions, capability negotiation, and
//! tool/resource/prompt registries for both the server and client roles.

pub mod client;
pub mod config;
pub mod events;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod repl;
pub mod resources;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use config::RuntimeConfig;
pub use events::{EventBus, EventKind, ServerEvent};
pub use prompts::{Prompt, PromptHandler};
pub use resources::{Resource, ResourceHandler};
pub use server::McpServer;
pub use tools::{Tool, ToolHandler};
pub use transport::{StdioTransport, StreamTransport, Transport};
pub use types::{McpError, McpResult};
