use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use aihub_common::ServiceKind;
use aihub_provider_core::{
    AdapterError, AdapterResult, AdapterTarget, ChatAdapter, ChatMessage, ChatRequest,
    ProbeReport, RawCompletion,
};

use crate::http_client::{decode_json, execute_checked};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI-compatible chat adapter. Also serves `custom` connections, which
/// differ only in base URL and key.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    service: ServiceKind,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        OpenAiAdapter {
            client,
            service: ServiceKind::OpenAi,
        }
    }

    pub fn for_custom(client: reqwest::Client) -> Self {
        OpenAiAdapter {
            client,
            service: ServiceKind::Custom,
        }
    }

    fn base_url<'a>(&self, target: &'a AdapterTarget) -> &'a str {
        target.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn authed(&self, builder: reqwest::RequestBuilder, target: &AdapterTarget) -> reqwest::RequestBuilder {
        match target.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct WireChatResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

#[derive(Deserialize)]
struct WireModelList {
    data: Vec<WireModel>,
}

#[derive(Deserialize)]
struct WireModel {
    id: String,
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    fn service(&self) -> ServiceKind {
        self.service
    }

    async fn complete(
        &self,
        target: &AdapterTarget,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RawCompletion> {
        let url = format!("{}/v1/chat/completions", self.base_url(target));
        let body = WireChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };
        let builder = self.authed(self.client.post(&url), target).json(&body);
        let response = execute_checked(builder, cancel).await?;
        let wire: WireChatResponse = decode_json(response).await?;

        let content = wire
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AdapterError::Transient {
                status: None,
                message: "upstream response carried no choices".to_string(),
            })?;
        let usage = wire.usage.unwrap_or(WireUsage {
            prompt_tokens: None,
            completion_tokens: None,
        });

        Ok(RawCompletion {
            content,
            model: wire.model.unwrap_or_else(|| request.model.clone()),
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn list_models(&self, target: &AdapterTarget) -> AdapterResult<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url(target));
        let builder = self.authed(self.client.get(&url), target);
        let response = execute_checked(builder, &CancellationToken::new()).await?;
        let wire: WireModelList = decode_json(response).await?;
        Ok(wire.data.into_iter().map(|model| model.id).collect())
    }

    async fn probe(&self, target: &AdapterTarget, timeout: Duration) -> AdapterResult<ProbeReport> {
        let url = format!("{}/v1/models", self.base_url(target));
        let builder = self.authed(self.client.get(&url), target).timeout(timeout);
        let started = Instant::now();
        execute_checked(builder, &CancellationToken::new()).await?;
        Ok(ProbeReport {
            ok: true,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }
}
