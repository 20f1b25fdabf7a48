//! Resource registration and dispatch.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::catalog::{Catalog, CatalogEntry, Registration};
use crate::types::{
    EntryKind, McpError, McpResult, ReadResourceResult, ResourceContent, ResourceDefinition,
};

/// Produces the contents of one resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: &str) -> anyhow::Result<Vec<ResourceContent>>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<ResourceContent>>> + Send + 'static,
{
    async fn read(&self, uri: &str) -> anyhow::Result<Vec<ResourceContent>> {
        (self)(uri.to_string()).await
    }
}

/// Check that a uri is non-empty and starts with a `scheme:` prefix.
pub fn validate_uri(uri: &str) -> McpResult<()> {
    let invalid = || McpError::InvalidResourceUri(uri.to_string());
    let (scheme, rest) = uri.split_once(':').ok_or_else(invalid)?;
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let scheme_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !starts_alpha || !scheme_ok || rest.is_empty() {
        return Err(invalid());
    }
    Ok(())
}

/// A readable artifact addressed by uri.
#[derive(Clone)]
pub struct Resource {
    definition: ResourceDefinition,
    handler: Arc<dyn ResourceHandler>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        handler: impl ResourceHandler + 'static,
    ) -> McpResult<Self> {
        let uri = uri.into();
        validate_uri(&uri)?;
        Ok(Self {
            definition: ResourceDefinition {
                uri,
                name: name.into(),
                description: None,
                mime_type: None,
            },
            handler: Arc::new(handler),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.definition.mime_type = Some(mime_type.into());
        self
    }

    pub fn uri(&self) -> &str {
        &self.definition.uri
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Run the handler; failures and panics yield an error-flagged result.
    pub async fn read(&self) -> ReadResourceResult {
        let handler = Arc::clone(&self.handler);
        let uri = self.definition.uri.clone();
        let task_uri = uri.clone();
        let task = tokio::spawn(async move { handler.read(&task_uri).await });

        match task.await {
            Ok(Ok(contents)) => ReadResourceResult::new(contents),
            Ok(Err(e)) => {
                tracing::warn!("Resource '{uri}' failed: {e:#}");
                ReadResourceResult::error(&uri, format!("Failed to read {uri}: {e:#}"))
            }
            Err(join_error) => {
                tracing::error!("Resource '{uri}' handler panicked: {join_error}");
                ReadResourceResult::error(&uri, format!("Failed to read {uri}: handler panicked"))
            }
        }
    }
}

impl CatalogEntry for Resource {
    fn key(&self) -> &str {
        self.uri()
    }
}

/// Registered resources in registration order.
pub struct ResourceRegistry {
    catalog: Catalog<Resource>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            catalog: Catalog::new(EntryKind::Resource),
        }
    }

    pub async fn register(&self, resource: Resource) -> McpResult<Registration> {
        let uri = resource.uri().to_string();
        let outcome = self.catalog.register(resource).await?;
        tracing::debug!("Registered resource '{uri}'");
        Ok(outcome)
    }

    pub async fn replace(&self, resource: Resource) -> Registration {
        self.catalog.replace(resource).await
    }

    pub async fn unregister(&self, uri: &str) -> bool {
        self.catalog.unregister(uri).await
    }

    pub async fn get(&self, uri: &str) -> Option<Arc<Resource>> {
        self.catalog.get(uri).await
    }

    pub async fn list_resources(&self) -> Vec<ResourceDefinition> {
        self.catalog
            .snapshot()
            .await
            .iter()
            .map(|r| r.definition().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.catalog.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.catalog.is_empty().await
    }

    pub async fn read(&self, uri: &str) -> McpResult<ReadResourceResult> {
        validate_uri(uri)?;
        let resource = self
            .get(uri)
            .await
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        Ok(resource.read().await)
    }
}
