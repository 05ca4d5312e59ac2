use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use serde::Deserialize;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use aihub_common::ServiceKind;
use aihub_core::read_model;
use aihub_storage::{
    BudgetLimitsRecord, ConnectionUpdate, NewConnection, NewCostConfig, UsageGranularity,
};

use crate::{ApiError, HttpState};

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/usage", get(usage))
        .route("/requests", get(recent_requests))
        .route("/connections", get(list_connections).post(create_connection))
        .route(
            "/connections/{id}",
            axum::routing::put(update_connection).delete(delete_connection),
        )
        .route("/connections/{id}/toggle", patch(toggle_connection))
        .route("/connections/{id}/budget-override", post(budget_override))
        .route("/budget", get(get_budget).put(put_budget))
        .route("/costs", get(list_costs).post(create_cost))
        .route("/costs/{id}", axum::routing::put(update_cost))
}

async fn stats(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let stats = read_model::stats(state.storage.as_ref()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    period: Option<String>,
    anchor: Option<String>,
}

async fn usage(
    State(state): State<HttpState>,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let period = query.period.as_deref().unwrap_or("daily");
    let granularity = UsageGranularity::parse(period)
        .ok_or_else(|| ApiError::bad_request(format!("unknown period {period:?}")))?;
    let anchor = match query.anchor.as_deref() {
        Some(raw) => Some(parse_anchor(raw)?),
        None => None,
    };
    let points = read_model::usage(state.storage.as_ref(), granularity, anchor).await?;
    Ok(Json(serde_json::json!({
        "period": period,
        "points": points,
    })))
}

fn parse_anchor(raw: &str) -> Result<Date, ApiError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw, &format)
        .map_err(|_| ApiError::bad_request(format!("invalid anchor date {raw:?}")))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u64>,
}

async fn recent_requests(
    State(state): State<HttpState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let rows = read_model::recent_requests(state.storage.as_ref(), limit).await?;
    Ok(Json(serde_json::json!({ "requests": rows })))
}

async fn list_connections(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let overviews = read_model::connection_overviews(&state.app, state.storage.as_ref()).await?;
    Ok(Json(serde_json::json!({ "connections": overviews })))
}

#[derive(Debug, Deserialize)]
struct ConnectionPayload {
    name: String,
    service: String,
    category: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    token: Option<String>,
    credential_file: Option<String>,
    default_model: Option<String>,
    enabled: Option<bool>,
    is_default: Option<bool>,
    daily_limit_usd: Option<f64>,
    weekly_limit_usd: Option<f64>,
    monthly_limit_usd: Option<f64>,
}

async fn create_connection(
    State(state): State<HttpState>,
    Json(payload): Json<ConnectionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ServiceKind::parse(&payload.service)
        .ok_or_else(|| ApiError::bad_request(format!("unknown service {:?}", payload.service)))?;

    let row = NewConnection {
        name: payload.name,
        service,
        category: payload.category,
        base_url: payload.base_url,
        api_key_enc: encrypt_opt(&state, payload.api_key.as_deref())?,
        token_enc: encrypt_opt(&state, payload.token.as_deref())?,
        credential_file_enc: encrypt_opt(&state, payload.credential_file.as_deref())?,
        default_model: payload.default_model,
        enabled: payload.enabled.unwrap_or(true),
        is_default: payload.is_default.unwrap_or(false),
        daily_limit_usd: payload.daily_limit_usd.unwrap_or(0.0),
        weekly_limit_usd: payload.weekly_limit_usd.unwrap_or(0.0),
        monthly_limit_usd: payload.monthly_limit_usd.unwrap_or(0.0),
    };
    let created = state.storage.insert_connection(&row).await?;
    state.app.reload(state.storage.as_ref()).await?;

    tracing::info!(
        event = "connection_created",
        connection_id = created.id,
        service = %created.service,
    );
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": created.id })),
    ))
}

#[derive(Debug, Deserialize)]
struct ConnectionUpdatePayload {
    name: Option<String>,
    category: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    token: Option<String>,
    credential_file: Option<String>,
    default_model: Option<String>,
    is_default: Option<bool>,
    daily_limit_usd: Option<f64>,
    weekly_limit_usd: Option<f64>,
    monthly_limit_usd: Option<f64>,
}

async fn update_connection(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Json(payload): Json<ConnectionUpdatePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = ConnectionUpdate {
        name: payload.name,
        category: payload.category,
        base_url: payload.base_url,
        api_key_enc: encrypt_opt(&state, payload.api_key.as_deref())?,
        token_enc: encrypt_opt(&state, payload.token.as_deref())?,
        credential_file_enc: encrypt_opt(&state, payload.credential_file.as_deref())?,
        default_model: payload.default_model,
        is_default: payload.is_default,
        daily_limit_usd: payload.daily_limit_usd,
        weekly_limit_usd: payload.weekly_limit_usd,
        monthly_limit_usd: payload.monthly_limit_usd,
    };
    let updated = state
        .storage
        .update_connection(id, &patch)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {id} not found")))?;
    state.app.reload(state.storage.as_ref()).await?;
    Ok(Json(serde_json::json!({
        "id": updated.id,
        "updated_at": updated.updated_at,
    })))
}

async fn toggle_connection(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let current = state
        .storage
        .get_connection(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {id} not found")))?;
    let updated = state
        .storage
        .set_connection_enabled(id, !current.enabled)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {id} not found")))?;
    state.app.reload(state.storage.as_ref()).await?;

    tracing::info!(
        event = "connection_toggled",
        connection_id = id,
        enabled = updated.enabled,
    );
    Ok(Json(serde_json::json!({
        "id": updated.id,
        "enabled": updated.enabled,
    })))
}

async fn delete_connection(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.storage.delete_connection(id).await? {
        return Err(ApiError::not_found(format!("connection {id} not found")));
    }
    state.app.reload(state.storage.as_ref()).await?;
    tracing::info!(event = "connection_deleted", connection_id = id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct OverridePayload {
    duration_minutes: Option<u64>,
}

async fn budget_override(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Json(payload): Json<OverridePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let minutes = payload.duration_minutes.unwrap_or(60);
    let until = OffsetDateTime::now_utc() + time::Duration::minutes(minutes as i64);
    let updated = state
        .storage
        .set_budget_override(id, until)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {id} not found")))?;
    state.app.reload(state.storage.as_ref()).await?;

    tracing::info!(
        event = "budget_override_set",
        connection_id = id,
        minutes,
    );
    Ok(Json(serde_json::json!({
        "id": updated.id,
        "budget_override_until": updated.budget_override_until,
    })))
}

async fn get_budget(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let limits = state.storage.get_budget_limits().await?;
    Ok(Json(budget_json(&limits)))
}

#[derive(Debug, Deserialize)]
struct BudgetPayload {
    daily_limit_usd: f64,
    weekly_limit_usd: f64,
    monthly_limit_usd: f64,
}

async fn put_budget(
    State(state): State<HttpState>,
    Json(payload): Json<BudgetPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let limits = BudgetLimitsRecord {
        daily_limit_usd: payload.daily_limit_usd,
        weekly_limit_usd: payload.weekly_limit_usd,
        monthly_limit_usd: payload.monthly_limit_usd,
    };
    state.storage.put_budget_limits(&limits).await?;
    Ok(Json(budget_json(&limits)))
}

fn budget_json(limits: &BudgetLimitsRecord) -> serde_json::Value {
    serde_json::json!({
        "daily_limit_usd": limits.daily_limit_usd,
        "weekly_limit_usd": limits.weekly_limit_usd,
        "monthly_limit_usd": limits.monthly_limit_usd,
    })
}

#[derive(Debug, Deserialize)]
struct CostQuery {
    connection_id: Option<i64>,
}

async fn list_costs(
    State(state): State<HttpState>,
    Query(query): Query<CostQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state.storage.list_cost_configs(query.connection_id).await?;
    let configs: Vec<_> = configs
        .into_iter()
        .map(|config| {
            serde_json::json!({
                "id": config.id,
                "connection_id": config.connection_id,
                "model_pattern": config.model_pattern,
                "input_cost_per_1m": config.input_cost_per_1m,
                "output_cost_per_1m": config.output_cost_per_1m,
                "updated_at": config.updated_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "cost_configs": configs })))
}

#[derive(Debug, Deserialize)]
struct CostPayload {
    connection_id: Option<i64>,
    model_pattern: String,
    input_cost_per_1m: f64,
    output_cost_per_1m: f64,
}

async fn create_cost(
    State(state): State<HttpState>,
    Json(payload): Json<CostPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .storage
        .insert_cost_config(&NewCostConfig {
            connection_id: payload.connection_id,
            model_pattern: payload.model_pattern,
            input_cost_per_1m: payload.input_cost_per_1m,
            output_cost_per_1m: payload.output_cost_per_1m,
        })
        .await?;
    state.app.reload(state.storage.as_ref()).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": created.id })),
    ))
}

#[derive(Debug, Deserialize)]
struct CostUpdatePayload {
    input_cost_per_1m: f64,
    output_cost_per_1m: f64,
}

async fn update_cost(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Json(payload): Json<CostUpdatePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .storage
        .update_cost_config(id, payload.input_cost_per_1m, payload.output_cost_per_1m)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cost config {id} not found")))?;
    state.app.reload(state.storage.as_ref()).await?;
    Ok(Json(serde_json::json!({
        "id": updated.id,
        "updated_at": updated.updated_at,
    })))
}

fn encrypt_opt(state: &HttpState, plaintext: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(plaintext) = plaintext else {
        return Ok(None);
    };
    state
        .app
        .vault
        .encrypt(plaintext)
        .map(Some)
        .map_err(|err| ApiError::from(aihub_core::HubError::Internal(err.to_string())))
}
