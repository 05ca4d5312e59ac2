use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};

use aihub_storage::AlertRecord;

use crate::{ApiError, HttpState};

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/active", get(list_active))
        .route("/{id}/dismiss", post(dismiss))
}

async fn list_alerts(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.storage.alert_list(false, 100).await?;
    Ok(Json(serde_json::json!({
        "alerts": alerts.iter().map(alert_json).collect::<Vec<_>>(),
    })))
}

async fn list_active(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.storage.alert_list(true, 100).await?;
    Ok(Json(serde_json::json!({
        "alerts": alerts.iter().map(alert_json).collect::<Vec<_>>(),
    })))
}

async fn dismiss(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.storage.alert_dismiss(id).await? {
        return Err(ApiError::not_found(format!("alert {id} not found")));
    }
    tracing::info!(event = "alert_dismissed", alert_id = id);
    Ok(Json(serde_json::json!({ "id": id, "dismissed": true })))
}

fn alert_json(alert: &AlertRecord) -> serde_json::Value {
    serde_json::json!({
        "id": alert.id,
        "created_at": alert.created_at,
        "resolved_at": alert.resolved_at,
        "dismissed_at": alert.dismissed_at,
        "connection_id": alert.connection_id,
        "kind": alert.kind,
        "severity": alert.severity,
        "message": alert.message,
        "metadata": alert.metadata,
        "active": alert.is_active(),
    })
}
