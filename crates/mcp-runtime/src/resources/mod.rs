//! Resource registry and the built-in runtime resources.

pub mod registry;
pub mod runtime;

pub use registry::{validate_uri, Resource, ResourceHandler, ResourceRegistry};
