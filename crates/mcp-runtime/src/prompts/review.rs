//! Prompt: review. Asks for a code review of a snippet.

use std::collections::HashMap;

use super::Prompt;
use crate::types::{McpResult, PromptArgument, PromptMessage};

pub fn prompt() -> McpResult<Prompt> {
    Prompt::new(
        "review",
        "Review a code snippet",
        vec![
            PromptArgument::required("code", "The code to review"),
            PromptArgument::optional("language", "Language of the snippet"),
            PromptArgument::optional("focus", "What to concentrate on, e.g. correctness or naming"),
        ],
        expand,
    )
}

async fn expand(args: HashMap<String, String>) -> anyhow::Result<Vec<PromptMessage>> {
    let code = args.get("code").map(String::as_str).unwrap_or_default();
    let language = args.get("language").map(String::as_str).unwrap_or("");
    let focus = args
        .get("focus")
        .map(|f| format!(" Concentrate on {f}."))
        .unwrap_or_default();

    let text = format!(
        "Review the following code.{focus}\n\
         Point out bugs first, then risky patterns, then style.\n\n\
         ```{language}\n{code}\n```"
    );
    Ok(vec![PromptMessage::user(text)])
}
