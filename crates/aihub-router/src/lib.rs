//! HTTP surface: the OpenAI-compatible completion endpoints plus the
//! dashboard and alert APIs. All handlers go through the same pipeline and
//! storage the workflow/MCP callers use.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use aihub_core::{AppState, HubError, Pipeline};
use aihub_provider_core::AdapterRegistry;
use aihub_storage::{Storage, StorageError};

mod alerts;
mod dashboard;
mod openai;

#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<AdapterRegistry>,
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .merge(openai::router())
        .nest("/api/dashboard", dashboard::router())
        .nest("/api/alerts", alerts::router())
        .with_state(state)
}

/// Boundary error shape: `{detail, code, metadata?}` with the status the
/// taxonomy dictates.
pub struct ApiError {
    status: StatusCode,
    detail: String,
    code: &'static str,
    metadata: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
            code: "bad_request",
            metadata: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
            code: "not_found",
            metadata: None,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.code(),
            metadata: err.metadata(),
            detail: err.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::from(HubError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "detail": self.detail,
            "code": self.code,
        });
        if let Some(metadata) = self.metadata {
            body["metadata"] = metadata;
        }
        (self.status, Json(body)).into_response()
    }
}
