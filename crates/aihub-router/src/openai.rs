use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

use aihub_core::CallOrigin;
use aihub_core::read_model;
use aihub_provider_core::{ChatMessage, ChatRequest, Role};

use crate::{ApiError, HttpState};

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
}

async fn health() -> impl IntoResponse {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_models(State(state): State<HttpState>) -> impl IntoResponse {
    let models = read_model::models_by_family(&state.app, &state.registry).await;
    Json(serde_json::json!({ "models": models }))
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    model: String,
    messages: Vec<IncomingMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
}

async fn chat_completions(
    State(state): State<HttpState>,
    Json(body): Json<CompletionBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.stream.unwrap_or(false) {
        return Err(ApiError::bad_request(
            "streaming responses are not supported",
        ));
    }

    let mut messages = Vec::with_capacity(body.messages.len());
    for message in body.messages {
        let role = match message.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(ApiError::bad_request(format!(
                    "unknown message role {other:?}"
                )));
            }
        };
        messages.push(ChatMessage {
            role,
            content: message.content,
        });
    }

    let request = ChatRequest {
        model: body.model,
        messages,
        max_tokens: body.max_tokens.unwrap_or(1000),
        temperature: body.temperature.unwrap_or(0.7),
    };

    let response = state
        .pipeline
        .execute(request, CallOrigin::Http, CancellationToken::new())
        .await?;

    let mut headers = HeaderMap::new();
    if let Some(fallback) = &response.fallback {
        headers.insert("x-hub-fallback", HeaderValue::from_static("true"));
        if let Ok(value) = HeaderValue::from_str(fallback.original.as_str()) {
            headers.insert("x-hub-original-provider", value);
        }
        if let Ok(value) = HeaderValue::from_str(fallback.actual.as_str()) {
            headers.insert("x-hub-actual-provider", value);
        }
    }

    Ok((headers, Json(response)))
}
