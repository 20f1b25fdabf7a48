//! Interactive client shell.
//!
//! Launch with `mcp-runtime repl -- <server command>` to spawn a server over
//! stdio and drive it by hand. Type `/help` for available commands, Tab for
//! completion.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context as _;
use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::client::McpClient;
use crate::config::RuntimeConfig;
use crate::transport::ChildTransport;
use crate::types::{Implementation, ResourceContent, ToolContent};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/info", "Show the negotiated server and capabilities"),
    ("/tools", "List tools"),
    ("/call", "Call a tool: /call <name> [json arguments]"),
    ("/resources", "List resources"),
    ("/read", "Read a resource: /read <uri>"),
    ("/prompts", "List prompts"),
    ("/prompt", "Expand a prompt: /prompt <name> [key=value ...]"),
    ("/ping", "Ping the server"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion. Knows the names the server listed at
/// startup.
#[derive(Default)]
struct McpHelper {
    tools: Vec<String>,
    resources: Vec<String>,
    prompts: Vec<String>,
}

impl McpHelper {
    fn names_for(&self, cmd: &str) -> Option<&[String]> {
        match cmd {
            "/call" => Some(&self.tools),
            "/read" => Some(&self.resources),
            "/prompt" => Some(&self.prompts),
            _ => None,
        }
    }
}

impl Completer for McpHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // Only the first argument is completed.
        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if args.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        if let Some(names) = self.names_for(cmd) {
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = names
                .iter()
                .filter(|n| n.starts_with(args))
                .map(|n| Pair {
                    display: n.clone(),
                    replacement: format!("{n} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for McpHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for McpHelper {}
impl Validator for McpHelper {}
impl Helper for McpHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Run the interactive shell against a server spawned from `command`.
///
/// Blocks the calling thread; call it from `spawn_blocking` inside a Tokio
/// runtime.
pub fn run(command: Vec<String>, config: RuntimeConfig) -> anyhow::Result<()> {
    let rt = Handle::current();
    let (program, args) = command
        .split_first()
        .context("No server command given. Usage: mcp-runtime repl -- <command> [args...]")?;

    let client = rt.block_on(async {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {program}"))?;
        let transport = Arc::new(
            ChildTransport::from_child(child)?.with_max_frame_bytes(config.max_frame_bytes),
        );
        let client = McpClient::connect(transport, &config).with_client_info(Implementation::new(
            "mcp-runtime-repl",
            env!("CARGO_PKG_VERSION"),
        ));
        client.initialize().await.context("Handshake failed")?;
        anyhow::Ok(client)
    })?;

    let helper = rt.block_on(async {
        McpHelper {
            tools: client
                .list_tools()
                .await
                .map(|l| l.into_iter().map(|t| t.name).collect())
                .unwrap_or_default(),
            resources: client
                .list_resources()
                .await
                .map(|l| l.into_iter().map(|r| r.uri).collect())
                .unwrap_or_default(),
            prompts: client
                .list_prompts()
                .await
                .map(|l| l.into_iter().map(|p| p.name).collect())
                .unwrap_or_default(),
        }
    });

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mmcp-runtime v{}\x1b[0m \x1b[90mconnected to {program}\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<McpHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".mcp_runtime_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mmcp>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                let outcome = match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => {
                        cmd_help();
                        Ok(())
                    }
                    "clear" | "cls" => {
                        eprint!("\x1b[2J\x1b[H");
                        Ok(())
                    }
                    "info" => rt.block_on(cmd_info(&client)),
                    "tools" => rt.block_on(cmd_tools(&client)),
                    "call" => rt.block_on(cmd_call(&client, args)),
                    "resources" => rt.block_on(cmd_resources(&client)),
                    "read" => rt.block_on(cmd_read(&client, args)),
                    "prompts" => rt.block_on(cmd_prompts(&client)),
                    "prompt" => rt.block_on(cmd_prompt(&client, args)),
                    "ping" => rt.block_on(cmd_ping(&client)),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                        Ok(())
                    }
                };
                if let Err(e) = outcome {
                    eprintln!("  \x1b[31mError:\x1b[0m {e:#}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);
    rt.block_on(client.close())?;

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completes commands and tool, resource and prompt names.");
    eprintln!();
}

async fn cmd_info(client: &McpClient) -> anyhow::Result<()> {
    let negotiated = client.negotiated().await.context("Not initialized")?;
    eprintln!();
    eprintln!(
        "  Server:   {} v{}",
        negotiated.server_info.name, negotiated.server_info.version
    );
    eprintln!("  Protocol: {}", negotiated.protocol_version);
    eprintln!(
        "  Capabilities: {}",
        serde_json::to_string(&negotiated.server_capabilities)?
    );
    eprintln!();
    Ok(())
}

async fn cmd_tools(client: &McpClient) -> anyhow::Result<()> {
    let tools = client.list_tools().await?;
    eprintln!();
    eprintln!("  {} tools available:", tools.len());
    eprintln!();
    for tool in &tools {
        eprintln!(
            "    {:<28} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        );
    }
    eprintln!();
    Ok(())
}

async fn cmd_call(client: &McpClient, args: &str) -> anyhow::Result<()> {
    let (name, raw) = args.split_once(' ').unwrap_or((args, ""));
    if name.is_empty() {
        eprintln!("  Usage: /call <name> [json arguments]");
        return Ok(());
    }
    let arguments: Value = if raw.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(raw).context("Arguments must be a JSON object")?
    };

    let result = client.call_tool(name, arguments).await?;
    let flagged = result.is_error();
    for item in &result.content {
        match item {
            ToolContent::Text { text } => print_block(text, flagged),
            ToolContent::Image { mime_type, data } => {
                eprintln!("  [image {mime_type}, {} bytes base64]", data.len())
            }
            ToolContent::Resource { resource } => print_resource(resource),
        }
    }
    Ok(())
}

async fn cmd_resources(client: &McpClient) -> anyhow::Result<()> {
    let resources = client.list_resources().await?;
    eprintln!();
    eprintln!("  {} resources available:", resources.len());
    eprintln!();
    for resource in &resources {
        eprintln!("    {:<28} {}", resource.uri, resource.name);
    }
    eprintln!();
    Ok(())
}

async fn cmd_read(client: &McpClient, args: &str) -> anyhow::Result<()> {
    if args.is_empty() {
        eprintln!("  Usage: /read <uri>");
        return Ok(());
    }
    let result = client.read_resource(args).await?;
    for content in &result.contents {
        print_resource(content);
    }
    Ok(())
}

async fn cmd_prompts(client: &McpClient) -> anyhow::Result<()> {
    let prompts = client.list_prompts().await?;
    eprintln!();
    eprintln!("  {} prompts available:", prompts.len());
    eprintln!();
    for prompt in &prompts {
        eprintln!(
            "    {:<28} {}",
            prompt.name,
            prompt.description.as_deref().unwrap_or("")
        );
    }
    eprintln!();
    Ok(())
}

async fn cmd_prompt(client: &McpClient, args: &str) -> anyhow::Result<()> {
    let mut parts = args.split_whitespace();
    let Some(name) = parts.next() else {
        eprintln!("  Usage: /prompt <name> [key=value ...]");
        return Ok(());
    };
    let arguments = parse_pairs(parts)?;

    let result = client.get_prompt(name, arguments).await?;
    let flagged = result.is_error();
    for message in &result.messages {
        eprintln!("  \x1b[90m[{}]\x1b[0m", message.role);
        if let Some(text) = message.content.as_text() {
            print_block(text, flagged);
        }
    }
    Ok(())
}

async fn cmd_ping(client: &McpClient) -> anyhow::Result<()> {
    let started = std::time::Instant::now();
    client.ping().await?;
    eprintln!("  pong ({}ms)", started.elapsed().as_millis());
    Ok(())
}

fn parse_pairs<'a>(
    parts: impl Iterator<Item = &'a str>,
) -> anyhow::Result<HashMap<String, String>> {
    parts
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Expected key=value, got '{pair}'"))
        })
        .collect()
}

fn print_block(text: &str, flagged: bool) {
    for line in text.lines() {
        if flagged {
            eprintln!("  \x1b[31m{line}\x1b[0m");
        } else {
            eprintln!("  {line}");
        }
    }
}

fn print_resource(content: &ResourceContent) {
    let mime = content.mime_type.as_deref().unwrap_or("unknown");
    eprintln!("  \x1b[90m{} ({mime})\x1b[0m", content.uri);
    match (&content.text, &content.blob) {
        (Some(text), _) => print_block(text, false),
        (None, Some(blob)) => eprintln!("  [{} bytes base64]", blob.len()),
        (None, None) => {}
    }
}
