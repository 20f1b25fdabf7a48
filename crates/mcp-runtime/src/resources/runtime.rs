//! Resources describing the running server: `runtime://info` and
//! `runtime://sessions`.

use std::sync::Arc;

use serde_json::json;

use super::Resource;
use crate::config::RuntimeConfig;
use crate::session::SessionManager;
use crate::types::{McpResult, ResourceContent};

pub const INFO_URI: &str = "runtime://info";
pub const SESSIONS_URI: &str = "runtime://sessions";

const JSON_MIME: &str = "application/json";

/// Server identity, versions and capabilities.
pub fn info(config: &RuntimeConfig) -> McpResult<Resource> {
    let body = json!({
        "name": config.server_name,
        "version": config.server_version,
        "protocolVersions": config.supported_versions,
        "capabilities": config.capabilities,
        "requestTimeoutMs": config.request_timeout.as_millis() as u64,
    });
    let text = serde_json::to_string_pretty(&body)?;

    Resource::new(INFO_URI, "Runtime info", move |uri: String| {
        let text = text.clone();
        async move { anyhow::Ok(vec![ResourceContent::text(uri, Some(JSON_MIME), text)]) }
    })
    .map(|r| {
        r.with_description("Server name, version and negotiated capabilities")
            .with_mime_type(JSON_MIME)
    })
}

/// The sessions currently connected to this server.
pub fn sessions(manager: Arc<SessionManager>) -> McpResult<Resource> {
    Resource::new(SESSIONS_URI, "Live sessions", move |uri: String| {
        let manager = Arc::clone(&manager);
        async move {
            let summaries = manager.summaries().await;
            let text = serde_json::to_string_pretty(&json!({
                "count": summaries.len(),
                "sessions": summaries,
            }))?;
            anyhow::Ok(vec![ResourceContent::text(uri, Some(JSON_MIME), text)])
        }
    })
    .map(|r| {
        r.with_description("Connected sessions and their handshake state")
            .with_mime_type(JSON_MIME)
    })
}

pub fn builtins(config: &RuntimeConfig, manager: Arc<SessionManager>) -> McpResult<Vec<Resource>> {
    Ok(vec![info(config)?, sessions(manager)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn info_reports_server_name() {
        let config = RuntimeConfig::default().with_server_name("unit");
        let result = info(&config).unwrap().read().await;
        let text = result.contents[0].text.clone().unwrap();
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["name"], "unit");
        assert_eq!(result.contents[0].uri, INFO_URI);
    }

    #[tokio::test]
    async fn sessions_starts_empty() {
        let result = sessions(Arc::new(SessionManager::new())).unwrap().read().await;
        let text = result.contents[0].text.as_deref().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["count"], 0);
    }
}
