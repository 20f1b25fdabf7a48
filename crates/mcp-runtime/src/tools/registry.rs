//! Tool registration and dispatch.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::registry::catalog::{Catalog, CatalogEntry, Registration};
use crate::types::{EntryKind, InputSchema, McpError, McpResult, ToolCallResult, ToolDefinition};

/// Executes one tool call.
///
/// Errors returned here are reported to the caller as an error-flagged
/// result, not as a protocol error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> anyhow::Result<ToolCallResult>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ToolCallResult>> + Send + 'static,
{
    async fn call(&self, arguments: Map<String, Value>) -> anyhow::Result<ToolCallResult> {
        (self)(arguments).await
    }
}

/// A named, schema-described tool and the handler that runs it.
#[derive(Clone)]
pub struct Tool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        handler: impl ToolHandler + 'static,
    ) -> McpResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(McpError::InvalidTool("tool name must not be empty".to_string()));
        }
        Ok(Self {
            definition: ToolDefinition {
                name,
                description: Some(description.into()),
                input_schema,
            },
            handler: Arc::new(handler),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Validate arguments and run the handler.
    ///
    /// Only argument validation produces an `Err`. A failing or panicking
    /// handler yields an error-flagged [`ToolCallResult`].
    pub async fn invoke(&self, arguments: Map<String, Value>) -> McpResult<ToolCallResult> {
        self.definition.input_schema.validate(&arguments)?;

        let handler = Arc::clone(&self.handler);
        let name = self.definition.name.clone();
        let task = tokio::spawn(async move { handler.call(arguments).await });

        Ok(match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!("Tool '{name}' failed: {e:#}");
                ToolCallResult::error(format!("Tool '{name}' failed: {e:#}"))
            }
            Err(join_error) => {
                tracing::error!("Tool '{name}' panicked: {join_error}");
                ToolCallResult::error(format!("Tool '{name}' panicked"))
            }
        })
    }
}

impl CatalogEntry for Tool {
    fn key(&self) -> &str {
        self.name()
    }
}

/// Registered tools in registration order.
pub struct ToolRegistry {
    catalog: Catalog<Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            catalog: Catalog::new(EntryKind::Tool),
        }
    }

    pub async fn register(&self, tool: Tool) -> McpResult<Registration> {
        let name = tool.name().to_string();
        let outcome = self.catalog.register(tool).await?;
        tracing::debug!("Registered tool '{name}'");
        Ok(outcome)
    }

    pub async fn replace(&self, tool: Tool) -> Registration {
        self.catalog.replace(tool).await
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.catalog.unregister(name).await
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.catalog.get(name).await
    }

    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.catalog
            .snapshot()
            .await
            .iter()
            .map(|t| t.definition().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.catalog.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.catalog.is_empty().await
    }
}
