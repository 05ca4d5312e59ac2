//! Stateless dashboard read model: everything is recomputed per fetch from
//! the persisted rows plus the live health snapshot.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, Duration as TimeDuration, OffsetDateTime};

use aihub_common::BudgetWindow;
use aihub_provider_core::AdapterRegistry;
use aihub_storage::{RequestRecord, Storage, StorageResult, UsageGranularity};
use aihub_vault::mask;

use crate::health::HealthStatus;
use crate::router::{best_connection, decrypt_target};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub window_hours: u32,
    pub requests: i64,
    pub failures: i64,
    pub error_rate: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
}

pub async fn stats(storage: &dyn Storage) -> StorageResult<DashboardStats> {
    let since = OffsetDateTime::now_utc() - TimeDuration::hours(24);
    let summary = storage.dashboard_stats(since).await?;
    let error_rate = if summary.request_count > 0 {
        summary.failure_count as f64 / summary.request_count as f64
    } else {
        0.0
    };
    Ok(DashboardStats {
        window_hours: 24,
        requests: summary.request_count,
        failures: summary.failure_count,
        error_rate,
        prompt_tokens: summary.prompt_tokens,
        completion_tokens: summary.completion_tokens,
        total_tokens: summary.prompt_tokens + summary.completion_tokens,
        cost_usd: summary.cost_usd,
        avg_latency_ms: summary.avg_latency_ms,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UsagePoint {
    pub day: String,
    pub provider: String,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

pub async fn usage(
    storage: &dyn Storage,
    granularity: UsageGranularity,
    anchor: Option<Date>,
) -> StorageResult<Vec<UsagePoint>> {
    let buckets = storage.usage_timeseries(granularity, anchor).await?;
    Ok(buckets
        .into_iter()
        .map(|bucket| UsagePoint {
            day: bucket.day,
            provider: bucket.provider,
            total_tokens: bucket.total_tokens,
            cost_usd: bucket.cost_usd,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentRequest {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub workflow: Option<String>,
}

impl From<RequestRecord> for RecentRequest {
    fn from(row: RequestRecord) -> Self {
        RecentRequest {
            id: row.id,
            created_at: row.created_at,
            model: row.model,
            provider: row.provider,
            prompt_tokens: row.prompt_tokens,
            completion_tokens: row.completion_tokens,
            cost_usd: row.cost_usd,
            latency_ms: row.latency_ms,
            success: row.success,
            error: row.error,
            workflow: row.workflow,
        }
    }
}

pub async fn recent_requests(
    storage: &dyn Storage,
    limit: u64,
) -> StorageResult<Vec<RecentRequest>> {
    let rows = storage.recent_requests(limit).await?;
    Ok(rows.into_iter().map(RecentRequest::from).collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct SpendByWindow {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
}

/// Per-connection view for the dashboard: masked credentials only, live
/// health, rolling spend, and the budget verdict the enforcer would reach.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionOverview {
    pub id: i64,
    pub name: String,
    pub service: String,
    pub category: Option<String>,
    pub base_url: Option<String>,
    pub api_key_masked: String,
    pub token_masked: String,
    pub default_model: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub budget_override_until: Option<OffsetDateTime>,
    pub spend: SpendByWindow,
    pub budget_blocked: bool,
    pub budget_blocked_window: Option<&'static str>,
    pub health: HealthStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub async fn connection_overviews(
    state: &AppState,
    storage: &dyn Storage,
) -> StorageResult<Vec<ConnectionOverview>> {
    let now = OffsetDateTime::now_utc();
    let connections = state.connections();
    let mut overviews = Vec::with_capacity(connections.len());

    for connection in connections.iter() {
        let service = connection.service.as_str();
        let spend = SpendByWindow {
            daily: storage.aggregate_spend(service, BudgetWindow::Daily).await?,
            weekly: storage.aggregate_spend(service, BudgetWindow::Weekly).await?,
            monthly: storage
                .aggregate_spend(service, BudgetWindow::Monthly)
                .await?,
        };

        let mut blocked_window = None;
        if !connection.override_active(now) {
            for window in BudgetWindow::ALL {
                let limit = connection.limit_for(window);
                let spent = match window {
                    BudgetWindow::Daily => spend.daily,
                    BudgetWindow::Weekly => spend.weekly,
                    BudgetWindow::Monthly => spend.monthly,
                };
                if limit > 0.0 && spent >= limit {
                    blocked_window = Some(window.as_str());
                    break;
                }
            }
        }

        overviews.push(ConnectionOverview {
            id: connection.id,
            name: connection.name.clone(),
            service: service.to_string(),
            category: connection.category.clone(),
            base_url: connection.base_url.clone(),
            api_key_masked: masked_credential(state, connection.api_key_enc.as_deref()),
            token_masked: masked_credential(state, connection.token_enc.as_deref()),
            default_model: connection.default_model.clone(),
            enabled: connection.enabled,
            is_default: connection.is_default,
            daily_limit_usd: connection.daily_limit_usd,
            weekly_limit_usd: connection.weekly_limit_usd,
            monthly_limit_usd: connection.monthly_limit_usd,
            budget_override_until: connection.budget_override_until,
            spend,
            budget_blocked: blocked_window.is_some(),
            budget_blocked_window: blocked_window,
            health: state.health.status(connection.service),
            created_at: connection.created_at,
            updated_at: connection.updated_at,
        });
    }

    Ok(overviews)
}

fn masked_credential(state: &AppState, ciphertext: Option<&str>) -> String {
    let Some(ciphertext) = ciphertext else {
        return String::new();
    };
    if ciphertext.is_empty() {
        return String::new();
    }
    match state.vault.decrypt(ciphertext) {
        Ok(plaintext) => mask(&plaintext),
        // Undecryptable (rotated key): show the short mask, never the blob.
        Err(_) => "****".to_string(),
    }
}

/// Live model listing grouped by provider family. Upstream failures yield an
/// empty list for that family rather than failing the whole call.
pub async fn models_by_family(
    state: &AppState,
    registry: &AdapterRegistry,
) -> BTreeMap<String, Vec<String>> {
    let connections = state.connections();
    let mut families: Vec<_> = connections
        .iter()
        .filter(|connection| connection.enabled && connection.service.is_chat())
        .map(|connection| connection.service)
        .collect();
    families.sort_by_key(|service| service.as_str());
    families.dedup();

    let mut out = BTreeMap::new();
    for service in families {
        let Some(connection) = best_connection(&connections, service) else {
            continue;
        };
        let Some(adapter) = registry.get(service) else {
            continue;
        };
        let target = decrypt_target(connection, &state.vault);
        let models = match adapter.list_models(&target).await {
            Ok(models) => models,
            Err(err) => {
                tracing::warn!(
                    event = "list_models_failed",
                    provider = %service,
                    error = %err,
                );
                Vec::new()
            }
        };
        out.insert(service.as_str().to_string(), models);
    }
    out
}
