//! The server's catalogs of tools, resources and prompts.

pub mod catalog;

pub use catalog::{Catalog, CatalogEntry, Registration, Snapshot};

use crate::prompts::PromptRegistry;
use crate::resources::ResourceRegistry;
use crate::tools::ToolRegistry;

/// Every capability a server exposes, grouped by kind.
#[derive(Default)]
pub struct Registry {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub prompts: PromptRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry counts as `(tools, resources, prompts)`.
    pub async fn counts(&self) -> (usize, usize, usize) {
        (
            self.tools.len().await,
            self.resources.len().await,
            self.prompts.len().await,
        )
    }
}
