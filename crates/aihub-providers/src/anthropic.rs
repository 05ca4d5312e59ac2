use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use aihub_common::ServiceKind;
use aihub_provider_core::{
    AdapterError, AdapterResult, AdapterTarget, ChatAdapter, ChatRequest, ProbeReport,
    RawCompletion, Role,
};

use crate::http_client::{decode_json, execute_checked};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages adapter. The canonical system message moves into the
/// dedicated `system` parameter; usage comes back as input/output tokens.
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        AnthropicAdapter { client }
    }

    fn base_url<'a>(&self, target: &'a AdapterTarget) -> &'a str {
        target.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn authed(&self, builder: reqwest::RequestBuilder, target: &AdapterTarget) -> reqwest::RequestBuilder {
        let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        match target.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.header("x-api-key", key),
            _ => builder,
        }
    }
}

#[derive(Serialize)]
struct WireMessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireMessagesResponse {
    model: Option<String>,
    content: Vec<WireContentBlock>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
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
impl ChatAdapter for AnthropicAdapter {
    fn service(&self) -> ServiceKind {
        ServiceKind::Anthropic
    }

    async fn complete(
        &self,
        target: &AdapterTarget,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> AdapterResult<RawCompletion> {
        let (system, rest) = request.split_system();
        let messages = rest
            .into_iter()
            .map(|message| WireMessage {
                role: match message.role {
                    Role::Assistant => "assistant",
                    // System messages were split out above.
                    Role::User | Role::System => "user",
                },
                content: &message.content,
            })
            .collect();

        let url = format!("{}/v1/messages", self.base_url(target));
        let body = WireMessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages,
        };
        let builder = self.authed(self.client.post(&url), target).json(&body);
        let response = execute_checked(builder, cancel).await?;
        let wire: WireMessagesResponse = decode_json(response).await?;

        let mut content = String::new();
        for block in &wire.content {
            if block.kind == "text"
                && let Some(text) = &block.text
            {
                content.push_str(text);
            }
        }
        if content.is_empty() && wire.content.is_empty() {
            return Err(AdapterError::Transient {
                status: None,
                message: "upstream response carried no content blocks".to_string(),
            });
        }
        let usage = wire.usage.unwrap_or(WireUsage {
            input_tokens: None,
            output_tokens: None,
        });

        Ok(RawCompletion {
            content,
            model: wire.model.unwrap_or_else(|| request.model.clone()),
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
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
