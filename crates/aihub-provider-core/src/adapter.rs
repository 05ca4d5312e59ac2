use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use aihub_common::ServiceKind;

use crate::errors::AdapterResult;
use crate::request::ChatRequest;
use crate::response::{ProbeReport, RawCompletion};

/// Everything an adapter needs to hit one configured connection: base URL
/// and decrypted credential material. Built by the router at dispatch time;
/// never persisted, never logged.
#[derive(Clone, Default)]
pub struct AdapterTarget {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    /// Model the `local` alias resolves to for this connection.
    pub default_model: Option<String>,
}

impl std::fmt::Debug for AdapterTarget {
    // Debug output carries no credential material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterTarget")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("token", &self.token.as_deref().map(|_| "<redacted>"))
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Capability set every provider family implements. One concrete type per
/// wire protocol; the router hands out `Arc<dyn ChatAdapter>` values and the
/// executor is generic over them.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn service(&self) -> ServiceKind;

    async fn complete(
        &self,
        target: &AdapterTarget,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RawCompletion>;

    async fn list_models(&self, target: &AdapterTarget) -> AdapterResult<Vec<String>>;

    /// Cheap health check used by the monitor loop only.
    async fn probe(&self, target: &AdapterTarget, timeout: Duration) -> AdapterResult<ProbeReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_credentials() {
        let target = AdapterTarget {
            base_url: Some("http://localhost:11434".to_string()),
            api_key: Some("sk-abcdefghijklmnop".to_string()),
            token: Some("ghp_secret".to_string()),
            default_model: None,
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("sk-abcdefghijklmnop"));
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
