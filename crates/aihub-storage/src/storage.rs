use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use aihub_common::{BudgetWindow, ServiceKind};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: i64,
    pub name: String,
    pub service: ServiceKind,
    pub category: Option<String>,
    pub base_url: Option<String>,
    pub api_key_enc: Option<String>,
    pub token_enc: Option<String>,
    pub credential_file_enc: Option<String>,
    pub default_model: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub budget_override_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ConnectionRecord {
    pub fn limit_for(&self, window: BudgetWindow) -> f64 {
        match window {
            BudgetWindow::Daily => self.daily_limit_usd,
            BudgetWindow::Weekly => self.weekly_limit_usd,
            BudgetWindow::Monthly => self.monthly_limit_usd,
        }
    }

    pub fn override_active(&self, now: OffsetDateTime) -> bool {
        self.budget_override_until
            .is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub service: ServiceKind,
    pub category: Option<String>,
    pub base_url: Option<String>,
    pub api_key_enc: Option<String>,
    pub token_enc: Option<String>,
    pub credential_file_enc: Option<String>,
    pub default_model: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
}

/// Field-level patch for connection edits. Credential fields left `None`
/// keep their stored ciphertext.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub base_url: Option<String>,
    pub api_key_enc: Option<String>,
    pub token_enc: Option<String>,
    pub credential_file_enc: Option<String>,
    pub default_model: Option<String>,
    pub is_default: Option<bool>,
    pub daily_limit_usd: Option<f64>,
    pub weekly_limit_usd: Option<f64>,
    pub monthly_limit_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CostConfigRecord {
    pub id: i64,
    pub connection_id: Option<i64>,
    pub model_pattern: String,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewCostConfig {
    pub connection_id: Option<i64>,
    pub model_pattern: String,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimitsRecord {
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
}

impl Default for BudgetLimitsRecord {
    fn default() -> Self {
        BudgetLimitsRecord {
            daily_limit_usd: 5.0,
            weekly_limit_usd: 25.0,
            monthly_limit_usd: 80.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRequest {
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

#[derive(Debug, Clone)]
pub struct RequestRecord {
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

#[derive(Debug, Clone)]
pub struct NewApiCall {
    pub service: String,
    pub operation: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<i32>,
    pub latency_ms: i64,
    pub cost_usd: f64,
    pub metadata: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub connection_id: i64,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
    pub dismissed_at: Option<OffsetDateTime>,
    pub connection_id: i64,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

impl AlertRecord {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none() && self.dismissed_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageGranularity {
    Daily,
    Weekly,
    Monthly,
}

impl UsageGranularity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(UsageGranularity::Daily),
            "weekly" => Some(UsageGranularity::Weekly),
            "monthly" => Some(UsageGranularity::Monthly),
            _ => None,
        }
    }

    /// Days of history covered by the window.
    pub fn span_days(&self) -> i64 {
        match self {
            UsageGranularity::Daily | UsageGranularity::Monthly => 30,
            UsageGranularity::Weekly => 7,
        }
    }
}

/// One UTC day of per-provider usage.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageBucket {
    pub day: String,
    pub provider: String,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSummary {
    pub request_count: i64,
    pub failure_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
}

/// Transactional gateway owning every row lifecycle.
///
/// Runtime hot-path reads (routing, credentials) come from in-memory
/// snapshots; the trait is used for bootstrap, appends, admin mutations and
/// the monitor/read-model aggregate queries.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync: creates missing tables/indexes, never
    /// destructive. Safe to run on every startup.
    async fn sync(&self) -> StorageResult<()>;

    async fn insert_request(&self, row: &NewRequest) -> StorageResult<i64>;
    async fn insert_api_call(&self, row: &NewApiCall) -> StorageResult<i64>;

    // Connections
    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>>;
    async fn get_connection(&self, id: i64) -> StorageResult<Option<ConnectionRecord>>;
    /// Also seeds the connection's catch-all zero-cost config, in the same
    /// transaction.
    async fn insert_connection(&self, row: &NewConnection) -> StorageResult<ConnectionRecord>;
    async fn update_connection(
        &self,
        id: i64,
        patch: &ConnectionUpdate,
    ) -> StorageResult<Option<ConnectionRecord>>;
    async fn set_connection_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> StorageResult<Option<ConnectionRecord>>;
    async fn set_budget_override(
        &self,
        id: i64,
        until: OffsetDateTime,
    ) -> StorageResult<Option<ConnectionRecord>>;
    /// Deletes the row; cost configs referencing it go with it (FK cascade).
    async fn delete_connection(&self, id: i64) -> StorageResult<bool>;

    // Budget limits (global singleton)
    async fn get_budget_limits(&self) -> StorageResult<BudgetLimitsRecord>;
    async fn put_budget_limits(&self, row: &BudgetLimitsRecord) -> StorageResult<()>;

    // Cost configs
    async fn list_cost_configs(
        &self,
        connection_id: Option<i64>,
    ) -> StorageResult<Vec<CostConfigRecord>>;
    async fn insert_cost_config(&self, row: &NewCostConfig) -> StorageResult<CostConfigRecord>;
    async fn update_cost_config(
        &self,
        id: i64,
        input_cost_per_1m: f64,
        output_cost_per_1m: f64,
    ) -> StorageResult<Option<CostConfigRecord>>;

    // Aggregates
    async fn aggregate_spend(&self, service: &str, window: BudgetWindow) -> StorageResult<f64>;
    async fn recent_requests(&self, limit: u64) -> StorageResult<Vec<RequestRecord>>;
    /// Newest-first success flags for a provider, bounded by `since`.
    async fn recent_outcomes(
        &self,
        service: &str,
        limit: u64,
        since: OffsetDateTime,
    ) -> StorageResult<Vec<bool>>;
    /// Newest-first latencies of successful requests for a provider.
    async fn recent_latencies(&self, service: &str, limit: u64) -> StorageResult<Vec<i64>>;
    async fn usage_timeseries(
        &self,
        granularity: UsageGranularity,
        anchor: Option<Date>,
    ) -> StorageResult<Vec<UsageBucket>>;
    async fn dashboard_stats(&self, since: OffsetDateTime) -> StorageResult<StatSummary>;

    // Alerts
    /// Conditional insert implementing the per-dedup-key logical lock: the
    /// candidate is dropped when an active alert with the same
    /// `(connection_id, kind)` exists, or when any alert with that key was
    /// created within `dedup_window`. Returns the inserted row, or None when
    /// suppressed.
    async fn alert_upsert_active(
        &self,
        candidate: &NewAlert,
        dedup_window: std::time::Duration,
    ) -> StorageResult<Option<AlertRecord>>;
    /// Sets `resolved_at` on active alerts for the key; returns how many.
    async fn alert_resolve(&self, connection_id: i64, kind: &str) -> StorageResult<u64>;
    async fn alert_dismiss(&self, id: i64) -> StorageResult<bool>;
    async fn alert_list(&self, active_only: bool, limit: u64) -> StorageResult<Vec<AlertRecord>>;
}
