//! MCP runtime entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use mcp_runtime::config::{
    resolve_instructions, resolve_protocol_versions, resolve_server_name, resolve_timeout,
};
use mcp_runtime::{McpServer, RuntimeConfig, StdioTransport};

#[derive(Parser)]
#[command(
    name = "mcp-runtime",
    about = "Model Context Protocol runtime: serve tools, resources and prompts over JSON-RPC",
    version
)]
struct Cli {
    /// Server name advertised during the handshake.
    /// Also reads MCP_RUNTIME_NAME.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Free-text instructions returned from initialize.
    /// Also reads MCP_RUNTIME_INSTRUCTIONS.
    #[arg(long, global = true)]
    instructions: Option<String>,

    /// Comma-separated protocol versions, preferred first.
    /// Also reads MCP_RUNTIME_PROTOCOL_VERSIONS.
    #[arg(long, global = true)]
    protocol_versions: Option<String>,

    /// Request timeout in milliseconds.
    /// Also reads MCP_RUNTIME_TIMEOUT_MS.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Largest inbound frame accepted over stdio, in bytes.
    #[arg(long, global = true)]
    max_frame_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve,

    /// Start MCP server over HTTP (event stream + POST).
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,

        /// Bearer token for authentication.
        /// Also reads MCP_RUNTIME_TOKEN env var.
        #[arg(long)]
        token: Option<String>,

        /// Allow cross-origin browser clients.
        #[arg(long)]
        cors: bool,
    },

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   mcp-runtime completions bash > ~/.local/share/bash-completion/completions/mcp-runtime
    ///   mcp-runtime completions zsh > ~/.zfunc/_mcp-runtime
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Spawn a server and drive it from an interactive shell.
    ///
    /// Example: mcp-runtime repl -- mcp-runtime serve
    Repl {
        /// Server command and arguments.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

impl Cli {
    fn runtime_config(&self) -> RuntimeConfig {
        let config = RuntimeConfig {
            server_name: resolve_server_name(self.name.as_deref()),
            instructions: resolve_instructions(self.instructions.as_deref()),
            supported_versions: resolve_protocol_versions(self.protocol_versions.as_deref()),
            request_timeout: resolve_timeout(self.timeout_ms),
            ..RuntimeConfig::default()
        };
        match self.max_frame_bytes {
            Some(limit) => config.with_max_frame_bytes(limit),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    // stdout carries protocol frames, so logs always go to stderr.
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    let config = cli.runtime_config();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let transport = StdioTransport::stdio().with_max_frame_bytes(config.max_frame_bytes);
            let server = McpServer::with_builtins(config).await?;
            tracing::info!("MCP runtime serving over stdio");
            server.serve(Arc::new(transport)).await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr, token, cors } => {
            use mcp_runtime::transport::{SseServer, SseServerConfig};

            // Resolve token: CLI flag > env var
            let effective_token = token.or_else(|| std::env::var("MCP_RUNTIME_TOKEN").ok());
            if effective_token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let server = Arc::new(McpServer::with_builtins(config).await?);
            let http = SseServer::new(
                server,
                SseServerConfig {
                    token: effective_token,
                    cors,
                },
            );
            http.run(&addr).await?;
        }

        Commands::Info => {
            let server = McpServer::with_builtins(config).await?;
            let registry = server.registry();
            let tools = registry.tools.list_tools().await;
            let resources = registry.resources.list_resources().await;
            let prompts = registry.prompts.list_prompts().await;
            let info = serde_json::json!({
                "server": server.config().server_info(),
                "protocolVersions": server.config().supported_versions,
                "capabilities": server.config().capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "resources": resources.iter().map(|r| &r.uri).collect::<Vec<_>>(),
                "prompts": prompts.iter().map(|p| &p.name).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mcp-runtime", &mut std::io::stdout());
        }

        Commands::Repl { command } => {
            tokio::task::spawn_blocking(move || mcp_runtime::repl::run(command, config)).await??;
        }
    }

    Ok(())
}
