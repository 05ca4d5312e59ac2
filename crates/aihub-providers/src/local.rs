use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use aihub_common::ServiceKind;
use aihub_provider_core::{
    AdapterError, AdapterResult, AdapterTarget, ChatAdapter, ChatRequest, ProbeReport,
    RawCompletion,
};

use crate::http_client::{decode_json, execute_checked};
use crate::openai::OpenAiAdapter;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local OpenAI-compatible adapter (Ollama and friends).
///
/// Speaks the `/v1/chat/completions` compatibility endpoint, not the native
/// API, so the wire shape is shared with the OpenAI adapter. The `local`
/// model alias is rewritten to the connection's configured default model
/// before anything goes on the wire.
pub struct LocalAdapter {
    client: reqwest::Client,
    inner: OpenAiAdapter,
}

impl LocalAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        LocalAdapter {
            inner: OpenAiAdapter::new(client.clone()),
            client,
        }
    }

    fn localized(&self, target: &AdapterTarget) -> AdapterTarget {
        AdapterTarget {
            base_url: Some(
                target
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ),
            ..target.clone()
        }
    }

    fn resolve_model(target: &AdapterTarget, model: &str) -> AdapterResult<String> {
        if model != "local" {
            return Ok(model.to_string());
        }
        match target.default_model.as_deref() {
            Some(default) if !default.is_empty() => Ok(default.to_string()),
            _ => Err(AdapterError::BadRequest {
                status: 400,
                message: "model alias \"local\" needs a default model on the connection"
                    .to_string(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct WireTagList {
    models: Vec<WireTag>,
}

#[derive(Deserialize)]
struct WireTag {
    name: String,
}

#[async_trait]
impl ChatAdapter for LocalAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::Ollama
    }

    async fn complete(
        &self,
        target: &AdapterTarget,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RawCompletion> {
        let target = self.localized(target);
        let model = Self::resolve_model(&target, &request.model)?;
        let request = ChatRequest {
            model,
            ..request.clone()
        };
        self.inner.complete(&target, &request, cancel).await
    }

    async fn list_models(&self, target: &AdapterTarget) -> AdapterResult<Vec<String>> {
        // Native tags endpoint: the compat surface of older Ollama builds
        // does not expose /v1/models.
        let target = self.localized(target);
        let url = format!("{}/api/tags", target.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL));
        let response = execute_checked(self.client.get(&url), &CancellationToken::new()).await?;
        let wire: WireTagList = decode_json(response).await?;
        Ok(wire.models.into_iter().map(|tag| tag.name).collect())
    }

    async fn probe(&self, target: &AdapterTarget, timeout: Duration) -> AdapterResult<ProbeReport> {
        let target = self.localized(target);
        let url = format!("{}/api/tags", target.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL));
        let started = Instant::now();
        execute_checked(self.client.get(&url).timeout(timeout), &CancellationToken::new())
            .await?;
        Ok(ProbeReport {
            ok: true,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }
}
