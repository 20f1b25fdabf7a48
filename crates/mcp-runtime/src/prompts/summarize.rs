//! Prompt: summarize. Asks for a summary of supplied text.

use std::collections::HashMap;

use super::Prompt;
use crate::types::{McpResult, PromptArgument, PromptMessage};

pub fn prompt() -> McpResult<Prompt> {
    Prompt::new(
        "summarize",
        "Summarize a piece of text",
        vec![
            PromptArgument::required("text", "The text to summarize"),
            PromptArgument::optional("style", "bullet, paragraph or tweet (default: paragraph)"),
        ],
        expand,
    )
}

async fn expand(args: HashMap<String, String>) -> anyhow::Result<Vec<PromptMessage>> {
    let text = args.get("text").map(String::as_str).unwrap_or_default();
    let style = args.get("style").map(String::as_str).unwrap_or("paragraph");
    let shape = match style {
        "bullet" => "as a short bulleted list",
        "paragraph" => "in one concise paragraph",
        "tweet" => "in under 280 characters",
        other => anyhow::bail!("unknown summary style '{other}'"),
    };
    Ok(vec![PromptMessage::user(format!(
        "Summarize the following text {shape}.\n\n{text}"
    ))])
}
