//! Prompt registration and dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::catalog::{Catalog, CatalogEntry, Registration};
use crate::types::{
    EntryKind, McpError, McpResult, PromptArgument, PromptDefinition, PromptGetResult,
    PromptMessage,
};

/// Expands a prompt template with the caller's arguments.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn expand(
        &self,
        arguments: HashMap<String, String>,
    ) -> anyhow::Result<Vec<PromptMessage>>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<PromptMessage>>> + Send + 'static,
{
    async fn expand(
        &self,
        arguments: HashMap<String, String>,
    ) -> anyhow::Result<Vec<PromptMessage>> {
        (self)(arguments).await
    }
}

/// A named, parameterized message template.
#[derive(Clone)]
pub struct Prompt {
    definition: PromptDefinition,
    handler: Arc<dyn PromptHandler>,
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Prompt {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: Vec<PromptArgument>,
        handler: impl PromptHandler + 'static,
    ) -> McpResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(McpError::InvalidPrompt("prompt name must not be empty".to_string()));
        }
        Ok(Self {
            definition: PromptDefinition {
                name,
                description: Some(description.into()),
                arguments: if arguments.is_empty() {
                    None
                } else {
                    Some(arguments)
                },
            },
            handler: Arc::new(handler),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PromptDefinition {
        &self.definition
    }

    fn check_arguments(&self, arguments: &HashMap<String, String>) -> McpResult<()> {
        let declared = self.definition.arguments.as_deref().unwrap_or_default();
        let missing: Vec<&str> = declared
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(McpError::InvalidParams(format!(
                "prompt '{}' is missing required arguments: {}",
                self.definition.name,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate arguments and expand the template.
    ///
    /// Missing required arguments are `INVALID_PARAMS`; a failing or
    /// panicking handler yields an error-flagged result.
    pub async fn get(&self, arguments: HashMap<String, String>) -> McpResult<PromptGetResult> {
        self.check_arguments(&arguments)?;

        let handler = Arc::clone(&self.handler);
        let name = self.definition.name.clone();
        let task = tokio::spawn(async move { handler.expand(arguments).await });

        Ok(match task.await {
            Ok(Ok(messages)) => PromptGetResult::new(self.definition.description.clone(), messages),
            Ok(Err(e)) => {
                tracing::warn!("Prompt '{name}' failed: {e:#}");
                PromptGetResult::error(format!("Prompt '{name}' failed: {e:#}"))
            }
            Err(join_error) => {
                tracing::error!("Prompt '{name}' panicked: {join_error}");
                PromptGetResult::error(format!("Prompt '{name}' panicked"))
            }
        })
    }
}

impl CatalogEntry for Prompt {
    fn key(&self) -> &str {
        self.name()
    }
}

/// Registered prompts in registration order.
pub struct PromptRegistry {
    catalog: Catalog<Prompt>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self {
            catalog: Catalog::new(EntryKind::Prompt),
        }
    }

    pub async fn register(&self, prompt: Prompt) -> McpResult<Registration> {
        let name = prompt.name().to_string();
        let outcome = self.catalog.register(prompt).await?;
        tracing::debug!("Registered prompt '{name}'");
        Ok(outcome)
    }

    pub async fn replace(&self, prompt: Prompt) -> Registration {
        self.catalog.replace(prompt).await
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.catalog.unregister(name).await
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Prompt>> {
        self.catalog.get(name).await
    }

    pub async fn list_prompts(&self) -> Vec<PromptDefinition> {
        self.catalog
            .snapshot()
            .await
            .iter()
            .map(|p| p.definition().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.catalog.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.catalog.is_empty().await
    }

    pub async fn expand(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> McpResult<PromptGetResult> {
        let prompt = self
            .get(name)
            .await
            .ok_or_else(|| McpError::InvalidPrompt(name.to_string()))?;
        prompt.get(arguments.unwrap_or_default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn greet(args: HashMap<String, String>) -> anyhow::Result<Vec<PromptMessage>> {
        let who = args.get("who").cloned().unwrap_or_default();
        Ok(vec![PromptMessage::user(format!("Say hello to {who}"))])
    }

    fn greet_prompt() -> Prompt {
        Prompt::new(
            "greet",
            "Greeting",
            vec![PromptArgument::required("who", "Who to greet")],
            greet,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn expands_with_arguments() {
        let registry = PromptRegistry::new();
        registry.register(greet_prompt()).await.unwrap();
        let args = HashMap::from([("who".to_string(), "Ada".to_string())]);
        let result = registry.expand("greet", Some(args)).await.unwrap();
        assert_eq!(result.description.as_deref(), Some("Greeting"));
        assert_eq!(result.messages[0].content.as_text(), Some("Say hello to Ada"));
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_params() {
        let registry = PromptRegistry::new();
        registry.register(greet_prompt()).await.unwrap();
        let err = registry.expand("greet", None).await.unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn unknown_prompt_is_invalid_prompt() {
        let registry = PromptRegistry::new();
        let err = registry.expand("nope", None).await.unwrap_err();
        assert_eq!(err.code(), -32002);
    }

    #[tokio::test]
    async fn arguments_are_listed_in_declaration_order() {
        let registry = PromptRegistry::new();
        let prompt = Prompt::new(
            "two",
            "Two args",
            vec![
                PromptArgument::required("first", "1"),
                PromptArgument::optional("second", "2"),
            ],
            greet,
        )
        .unwrap();
        registry.register(prompt).await.unwrap();
        let listed = registry.list_prompts().await;
        let names: Vec<&str> = listed[0]
            .arguments
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
