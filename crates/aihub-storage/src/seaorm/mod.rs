use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Schema, Statement, TransactionTrait,
};
use time::{Date, Duration as TimeDuration, OffsetDateTime, Time};

use aihub_common::{BudgetWindow, ServiceKind};

use crate::entities;
use crate::storage::{
    AlertRecord, BudgetLimitsRecord, ConnectionRecord, ConnectionUpdate, CostConfigRecord,
    NewAlert, NewApiCall, NewConnection, NewCostConfig, NewRequest, RequestRecord, StatSummary,
    Storage, StorageError, StorageResult, UsageBucket, UsageGranularity,
};

#[derive(Debug, FromQueryResult)]
struct SpendRow {
    spent: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct UsageBucketRow {
    day: String,
    provider: String,
    total_tokens: Option<i64>,
    cost_usd: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct StatTotalsRow {
    request_count: Option<i64>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    cost_usd: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct LatencyTotalsRow {
    success_count: Option<i64>,
    latency_total_ms: Option<i64>,
}

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Sqlite ships with foreign keys off; cascade delete depends on them.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub async fn connect_file(path: &str) -> StorageResult<Self> {
        Self::connect(&format!("sqlite://{path}?mode=rwc")).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        use entities::alerts::Column as AlertColumn;
        use entities::api_calls::Column as ApiCallColumn;
        use entities::requests::Column as RequestColumn;

        let statements = vec![
            Index::create()
                .name("idx_requests_created_at")
                .table(entities::requests::Entity)
                .col(RequestColumn::CreatedAt)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_requests_provider_created_at")
                .table(entities::requests::Entity)
                .col(RequestColumn::Provider)
                .col(RequestColumn::CreatedAt)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_api_calls_service_created_at")
                .table(entities::api_calls::Entity)
                .col(ApiCallColumn::Service)
                .col(ApiCallColumn::CreatedAt)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_alerts_connection_kind_created_at")
                .table(entities::alerts::Entity)
                .col(AlertColumn::ConnectionId)
                .col(AlertColumn::Kind)
                .col(AlertColumn::CreatedAt)
                .if_not_exists()
                .to_owned(),
        ];

        for statement in statements {
            self.db.execute(&statement).await?;
        }
        Ok(())
    }
}

fn connection_record(m: entities::connections::Model) -> ConnectionRecord {
    ConnectionRecord {
        id: m.id,
        name: m.name,
        service: ServiceKind::parse(&m.service).unwrap_or(ServiceKind::Custom),
        category: m.category,
        base_url: m.base_url,
        api_key_enc: m.api_key_enc,
        token_enc: m.token_enc,
        credential_file_enc: m.credential_file_enc,
        default_model: m.default_model,
        enabled: m.enabled,
        is_default: m.is_default,
        daily_limit_usd: m.daily_limit_usd,
        weekly_limit_usd: m.weekly_limit_usd,
        monthly_limit_usd: m.monthly_limit_usd,
        budget_override_until: m.budget_override_until,
        created_at: m.created_at,
        updated_at: m.updated_at,
    }
}

fn cost_config_record(m: entities::cost_configs::Model) -> CostConfigRecord {
    CostConfigRecord {
        id: m.id,
        connection_id: m.connection_id,
        model_pattern: m.model_pattern,
        input_cost_per_1m: m.input_cost_per_1m,
        output_cost_per_1m: m.output_cost_per_1m,
        updated_at: m.updated_at,
    }
}

fn request_record(m: entities::requests::Model) -> RequestRecord {
    RequestRecord {
        id: m.id,
        created_at: m.created_at,
        model: m.model,
        provider: m.provider,
        prompt_tokens: m.prompt_tokens,
        completion_tokens: m.completion_tokens,
        cost_usd: m.cost_usd,
        latency_ms: m.latency_ms,
        success: m.success,
        error: m.error,
        workflow: m.workflow,
    }
}

fn alert_record(m: entities::alerts::Model) -> AlertRecord {
    AlertRecord {
        id: m.id,
        created_at: m.created_at,
        resolved_at: m.resolved_at,
        dismissed_at: m.dismissed_at,
        connection_id: m.connection_id,
        kind: m.kind,
        severity: m.severity,
        message: m.message,
        metadata: m.metadata,
    }
}

fn day_window(granularity: UsageGranularity, anchor: Option<Date>) -> (OffsetDateTime, OffsetDateTime) {
    let anchor = anchor.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let end_exclusive = anchor
        .next_day()
        .unwrap_or(anchor)
        .with_time(Time::MIDNIGHT)
        .assume_utc();
    let start = end_exclusive - TimeDuration::days(granularity.span_days());
    (start, end_exclusive)
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Connections)
            .register(entities::CostConfigs)
            .register(entities::BudgetLimits)
            .register(entities::Requests)
            .register(entities::ApiCalls)
            .register(entities::Alerts)
            .sync(&self.db)
            .await?;
        self.ensure_indexes().await?;
        Ok(())
    }

    async fn insert_request(&self, row: &NewRequest) -> StorageResult<i64> {
        use entities::requests::ActiveModel as RequestActive;

        let active = RequestActive {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            model: ActiveValue::Set(row.model.clone()),
            provider: ActiveValue::Set(row.provider.clone()),
            prompt_tokens: ActiveValue::Set(row.prompt_tokens),
            completion_tokens: ActiveValue::Set(row.completion_tokens),
            cost_usd: ActiveValue::Set(row.cost_usd),
            latency_ms: ActiveValue::Set(row.latency_ms),
            success: ActiveValue::Set(row.success),
            error: ActiveValue::Set(row.error.clone()),
            workflow: ActiveValue::Set(row.workflow.clone()),
        };
        let inserted = entities::Requests::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn insert_api_call(&self, row: &NewApiCall) -> StorageResult<i64> {
        use entities::api_calls::ActiveModel as ApiCallActive;

        let active = ApiCallActive {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            service: ActiveValue::Set(row.service.clone()),
            operation: ActiveValue::Set(row.operation.clone()),
            endpoint: ActiveValue::Set(row.endpoint.clone()),
            method: ActiveValue::Set(row.method.clone()),
            status_code: ActiveValue::Set(row.status_code),
            latency_ms: ActiveValue::Set(row.latency_ms),
            cost_usd: ActiveValue::Set(row.cost_usd),
            metadata: ActiveValue::Set(row.metadata.clone()),
            success: ActiveValue::Set(row.success),
            error: ActiveValue::Set(row.error.clone()),
        };
        let inserted = entities::ApiCalls::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>> {
        use entities::connections::Column;
        let rows = entities::Connections::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(connection_record).collect())
    }

    async fn get_connection(&self, id: i64) -> StorageResult<Option<ConnectionRecord>> {
        let row = entities::Connections::find_by_id(id).one(&self.db).await?;
        Ok(row.map(connection_record))
    }

    async fn insert_connection(&self, row: &NewConnection) -> StorageResult<ConnectionRecord> {
        use entities::connections::ActiveModel as ConnectionActive;
        use entities::cost_configs::ActiveModel as CostConfigActive;

        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;

        let active = ConnectionActive {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(row.name.clone()),
            service: ActiveValue::Set(row.service.as_str().to_string()),
            category: ActiveValue::Set(row.category.clone()),
            base_url: ActiveValue::Set(row.base_url.clone()),
            api_key_enc: ActiveValue::Set(row.api_key_enc.clone()),
            token_enc: ActiveValue::Set(row.token_enc.clone()),
            credential_file_enc: ActiveValue::Set(row.credential_file_enc.clone()),
            default_model: ActiveValue::Set(row.default_model.clone()),
            enabled: ActiveValue::Set(row.enabled),
            is_default: ActiveValue::Set(row.is_default),
            daily_limit_usd: ActiveValue::Set(row.daily_limit_usd),
            weekly_limit_usd: ActiveValue::Set(row.weekly_limit_usd),
            monthly_limit_usd: ActiveValue::Set(row.monthly_limit_usd),
            budget_override_until: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Connections::insert(active).exec(&txn).await?;
        let connection_id = inserted.last_insert_id;

        // Every new connection starts with a catch-all zero-cost config.
        let seed = CostConfigActive {
            id: ActiveValue::NotSet,
            connection_id: ActiveValue::Set(Some(connection_id)),
            model_pattern: ActiveValue::Set("*".to_string()),
            input_cost_per_1m: ActiveValue::Set(0.0),
            output_cost_per_1m: ActiveValue::Set(0.0),
            updated_at: ActiveValue::Set(now),
        };
        entities::CostConfigs::insert(seed).exec(&txn).await?;
        txn.commit().await?;

        let created = entities::Connections::find_by_id(connection_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StorageError::Db(sea_orm::DbErr::RecordNotFound(format!(
                    "connection {connection_id} vanished after insert"
                )))
            })?;
        Ok(connection_record(created))
    }

    async fn update_connection(
        &self,
        id: i64,
        patch: &ConnectionUpdate,
    ) -> StorageResult<Option<ConnectionRecord>> {
        use entities::connections::ActiveModel as ConnectionActive;

        let Some(model) = entities::Connections::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };

        let mut active: ConnectionActive = model.into();
        if let Some(name) = &patch.name {
            active.name = ActiveValue::Set(name.clone());
        }
        if let Some(category) = &patch.category {
            active.category = ActiveValue::Set(Some(category.clone()));
        }
        if let Some(base_url) = &patch.base_url {
            active.base_url = ActiveValue::Set(Some(base_url.clone()));
        }
        if let Some(api_key_enc) = &patch.api_key_enc {
            active.api_key_enc = ActiveValue::Set(Some(api_key_enc.clone()));
        }
        if let Some(token_enc) = &patch.token_enc {
            active.token_enc = ActiveValue::Set(Some(token_enc.clone()));
        }
        if let Some(credential_file_enc) = &patch.credential_file_enc {
            active.credential_file_enc = ActiveValue::Set(Some(credential_file_enc.clone()));
        }
        if let Some(default_model) = &patch.default_model {
            active.default_model = ActiveValue::Set(Some(default_model.clone()));
        }
        if let Some(is_default) = patch.is_default {
            active.is_default = ActiveValue::Set(is_default);
        }
        if let Some(limit) = patch.daily_limit_usd {
            active.daily_limit_usd = ActiveValue::Set(limit);
        }
        if let Some(limit) = patch.weekly_limit_usd {
            active.weekly_limit_usd = ActiveValue::Set(limit);
        }
        if let Some(limit) = patch.monthly_limit_usd {
            active.monthly_limit_usd = ActiveValue::Set(limit);
        }
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let updated = active.update(&self.db).await?;
        Ok(Some(connection_record(updated)))
    }

    async fn set_connection_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> StorageResult<Option<ConnectionRecord>> {
        use entities::connections::ActiveModel as ConnectionActive;

        let Some(model) = entities::Connections::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: ConnectionActive = model.into();
        active.enabled = ActiveValue::Set(enabled);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let updated = active.update(&self.db).await?;
        Ok(Some(connection_record(updated)))
    }

    async fn set_budget_override(
        &self,
        id: i64,
        until: OffsetDateTime,
    ) -> StorageResult<Option<ConnectionRecord>> {
        use entities::connections::ActiveModel as ConnectionActive;

        let Some(model) = entities::Connections::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: ConnectionActive = model.into();
        active.budget_override_until = ActiveValue::Set(Some(until));
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let updated = active.update(&self.db).await?;
        Ok(Some(connection_record(updated)))
    }

    async fn delete_connection(&self, id: i64) -> StorageResult<bool> {
        // Cost configs go via DB-level ON DELETE CASCADE.
        let result = entities::Connections::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn get_budget_limits(&self) -> StorageResult<BudgetLimitsRecord> {
        use entities::budget_limits::ActiveModel as BudgetActive;

        if let Some(row) = entities::BudgetLimits::find_by_id(1_i64).one(&self.db).await? {
            return Ok(BudgetLimitsRecord {
                daily_limit_usd: row.daily_limit_usd,
                weekly_limit_usd: row.weekly_limit_usd,
                monthly_limit_usd: row.monthly_limit_usd,
            });
        }

        let defaults = BudgetLimitsRecord::default();
        let active = BudgetActive {
            id: ActiveValue::Set(1),
            daily_limit_usd: ActiveValue::Set(defaults.daily_limit_usd),
            weekly_limit_usd: ActiveValue::Set(defaults.weekly_limit_usd),
            monthly_limit_usd: ActiveValue::Set(defaults.monthly_limit_usd),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::BudgetLimits::insert(active).exec(&self.db).await?;
        Ok(defaults)
    }

    async fn put_budget_limits(&self, row: &BudgetLimitsRecord) -> StorageResult<()> {
        use entities::budget_limits::ActiveModel as BudgetActive;

        let now = OffsetDateTime::now_utc();
        match entities::BudgetLimits::find_by_id(1_i64).one(&self.db).await? {
            Some(model) => {
                let mut active: BudgetActive = model.into();
                active.daily_limit_usd = ActiveValue::Set(row.daily_limit_usd);
                active.weekly_limit_usd = ActiveValue::Set(row.weekly_limit_usd);
                active.monthly_limit_usd = ActiveValue::Set(row.monthly_limit_usd);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = BudgetActive {
                    id: ActiveValue::Set(1),
                    daily_limit_usd: ActiveValue::Set(row.daily_limit_usd),
                    weekly_limit_usd: ActiveValue::Set(row.weekly_limit_usd),
                    monthly_limit_usd: ActiveValue::Set(row.monthly_limit_usd),
                    updated_at: ActiveValue::Set(now),
                };
                entities::BudgetLimits::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn list_cost_configs(
        &self,
        connection_id: Option<i64>,
    ) -> StorageResult<Vec<CostConfigRecord>> {
        use entities::cost_configs::Column;

        let mut query = entities::CostConfigs::find().order_by_asc(Column::Id);
        if let Some(connection_id) = connection_id {
            query = query.filter(Column::ConnectionId.eq(connection_id));
        }
        let rows = query.all(&self.db).await?;
        Ok(rows.into_iter().map(cost_config_record).collect())
    }

    async fn insert_cost_config(&self, row: &NewCostConfig) -> StorageResult<CostConfigRecord> {
        use entities::cost_configs::ActiveModel as CostConfigActive;

        let active = CostConfigActive {
            id: ActiveValue::NotSet,
            connection_id: ActiveValue::Set(row.connection_id),
            model_pattern: ActiveValue::Set(row.model_pattern.clone()),
            input_cost_per_1m: ActiveValue::Set(row.input_cost_per_1m),
            output_cost_per_1m: ActiveValue::Set(row.output_cost_per_1m),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = entities::CostConfigs::insert(active).exec(&self.db).await?;
        let created = entities::CostConfigs::find_by_id(inserted.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StorageError::Db(sea_orm::DbErr::RecordNotFound(
                    "cost config vanished after insert".to_string(),
                ))
            })?;
        Ok(cost_config_record(created))
    }

    async fn update_cost_config(
        &self,
        id: i64,
        input_cost_per_1m: f64,
        output_cost_per_1m: f64,
    ) -> StorageResult<Option<CostConfigRecord>> {
        use entities::cost_configs::ActiveModel as CostConfigActive;

        let Some(model) = entities::CostConfigs::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: CostConfigActive = model.into();
        active.input_cost_per_1m = ActiveValue::Set(input_cost_per_1m);
        active.output_cost_per_1m = ActiveValue::Set(output_cost_per_1m);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let updated = active.update(&self.db).await?;
        Ok(Some(cost_config_record(updated)))
    }

    async fn aggregate_spend(&self, service: &str, window: BudgetWindow) -> StorageResult<f64> {
        use entities::api_calls::Column as ApiCallColumn;
        use entities::requests::Column as RequestColumn;

        let cutoff = OffsetDateTime::now_utc()
            - TimeDuration::seconds(window.duration().as_secs() as i64);

        let request_spend = entities::Requests::find()
            .select_only()
            .column_as(RequestColumn::CostUsd.sum(), "spent")
            .filter(RequestColumn::Provider.eq(service))
            .filter(RequestColumn::CreatedAt.gte(cutoff))
            .into_model::<SpendRow>()
            .one(&self.db)
            .await?
            .and_then(|row| row.spent)
            .unwrap_or(0.0);

        let api_spend = entities::ApiCalls::find()
            .select_only()
            .column_as(ApiCallColumn::CostUsd.sum(), "spent")
            .filter(ApiCallColumn::Service.eq(service))
            .filter(ApiCallColumn::CreatedAt.gte(cutoff))
            .into_model::<SpendRow>()
            .one(&self.db)
            .await?
            .and_then(|row| row.spent)
            .unwrap_or(0.0);

        Ok(request_spend + api_spend)
    }

    async fn recent_requests(&self, limit: u64) -> StorageResult<Vec<RequestRecord>> {
        use entities::requests::Column;

        let rows = entities::Requests::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(request_record).collect())
    }

    async fn recent_outcomes(
        &self,
        service: &str,
        limit: u64,
        since: OffsetDateTime,
    ) -> StorageResult<Vec<bool>> {
        use entities::requests::Column;

        let rows = entities::Requests::find()
            .filter(Column::Provider.eq(service))
            .filter(Column::CreatedAt.gte(since))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.success).collect())
    }

    async fn recent_latencies(&self, service: &str, limit: u64) -> StorageResult<Vec<i64>> {
        use entities::requests::Column;

        let rows = entities::Requests::find()
            .filter(Column::Provider.eq(service))
            .filter(Column::Success.eq(true))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.latency_ms).collect())
    }

    async fn usage_timeseries(
        &self,
        granularity: UsageGranularity,
        anchor: Option<Date>,
    ) -> StorageResult<Vec<UsageBucket>> {
        let (from, to) = day_window(granularity, anchor);

        // Day bucketing needs backend SQL; sqlite strftime over the stored
        // RFC3339 timestamps groups on UTC day boundaries.
        let rows = UsageBucketRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            r#"
            SELECT strftime('%Y-%m-%d', "created_at") AS "day",
                   "provider",
                   SUM("prompt_tokens" + "completion_tokens") AS "total_tokens",
                   SUM("cost_usd") AS "cost_usd"
            FROM "requests"
            WHERE "created_at" >= ? AND "created_at" < ?
            GROUP BY "day", "provider"
            ORDER BY "day" ASC, "provider" ASC
            "#,
            [from.into(), to.into()],
        ))
        .all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UsageBucket {
                day: row.day,
                provider: row.provider,
                total_tokens: row.total_tokens.unwrap_or(0),
                cost_usd: row.cost_usd.unwrap_or(0.0),
            })
            .collect())
    }

    async fn dashboard_stats(&self, since: OffsetDateTime) -> StorageResult<StatSummary> {
        use entities::requests::Column;

        let totals = entities::Requests::find()
            .select_only()
            .column_as(Column::Id.count(), "request_count")
            .column_as(Column::PromptTokens.sum(), "prompt_tokens")
            .column_as(Column::CompletionTokens.sum(), "completion_tokens")
            .column_as(Column::CostUsd.sum(), "cost_usd")
            .filter(Column::CreatedAt.gte(since))
            .into_model::<StatTotalsRow>()
            .one(&self.db)
            .await?
            .unwrap_or(StatTotalsRow {
                request_count: None,
                prompt_tokens: None,
                completion_tokens: None,
                cost_usd: None,
            });

        let failure_count = entities::Requests::find()
            .filter(Column::CreatedAt.gte(since))
            .filter(Column::Success.eq(false))
            .count(&self.db)
            .await?;

        let latency = entities::Requests::find()
            .select_only()
            .column_as(Column::Id.count(), "success_count")
            .column_as(Column::LatencyMs.sum(), "latency_total_ms")
            .filter(Column::CreatedAt.gte(since))
            .filter(Column::Success.eq(true))
            .into_model::<LatencyTotalsRow>()
            .one(&self.db)
            .await?;
        let avg_latency = match latency {
            Some(row) => {
                let count = row.success_count.unwrap_or(0);
                if count > 0 {
                    row.latency_total_ms.unwrap_or(0) as f64 / count as f64
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        Ok(StatSummary {
            request_count: totals.request_count.unwrap_or(0),
            failure_count: failure_count as i64,
            prompt_tokens: totals.prompt_tokens.unwrap_or(0),
            completion_tokens: totals.completion_tokens.unwrap_or(0),
            cost_usd: totals.cost_usd.unwrap_or(0.0),
            avg_latency_ms: avg_latency,
        })
    }

    async fn alert_upsert_active(
        &self,
        candidate: &NewAlert,
        dedup_window: std::time::Duration,
    ) -> StorageResult<Option<AlertRecord>> {
        use entities::alerts::{ActiveModel as AlertActive, Column};

        let now = OffsetDateTime::now_utc();

        let active_count = entities::Alerts::find()
            .filter(Column::ConnectionId.eq(candidate.connection_id))
            .filter(Column::Kind.eq(candidate.kind.as_str()))
            .filter(Column::ResolvedAt.is_null())
            .filter(Column::DismissedAt.is_null())
            .count(&self.db)
            .await?;
        if active_count > 0 {
            return Ok(None);
        }

        let dedup_cutoff = now - TimeDuration::seconds(dedup_window.as_secs() as i64);
        let recent = entities::Alerts::find()
            .filter(Column::ConnectionId.eq(candidate.connection_id))
            .filter(Column::Kind.eq(candidate.kind.as_str()))
            .filter(Column::CreatedAt.gte(dedup_cutoff))
            .count(&self.db)
            .await?;
        if recent > 0 {
            return Ok(None);
        }

        let active = AlertActive {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(now),
            resolved_at: ActiveValue::Set(None),
            dismissed_at: ActiveValue::Set(None),
            connection_id: ActiveValue::Set(candidate.connection_id),
            kind: ActiveValue::Set(candidate.kind.clone()),
            severity: ActiveValue::Set(candidate.severity.clone()),
            message: ActiveValue::Set(candidate.message.clone()),
            metadata: ActiveValue::Set(candidate.metadata.clone()),
        };
        let inserted = entities::Alerts::insert(active).exec(&self.db).await?;
        let created = entities::Alerts::find_by_id(inserted.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StorageError::Db(sea_orm::DbErr::RecordNotFound(
                    "alert vanished after insert".to_string(),
                ))
            })?;
        Ok(Some(alert_record(created)))
    }

    async fn alert_resolve(&self, connection_id: i64, kind: &str) -> StorageResult<u64> {
        use entities::alerts::Column;

        let result = entities::Alerts::update_many()
            .col_expr(Column::ResolvedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::Kind.eq(kind))
            .filter(Column::ResolvedAt.is_null())
            .filter(Column::DismissedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn alert_dismiss(&self, id: i64) -> StorageResult<bool> {
        use entities::alerts::ActiveModel as AlertActive;

        let Some(model) = entities::Alerts::find_by_id(id).one(&self.db).await? else {
            return Ok(false);
        };
        if model.dismissed_at.is_some() {
            return Ok(true);
        }
        let mut active: AlertActive = model.into();
        active.dismissed_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(true)
    }

    async fn alert_list(&self, active_only: bool, limit: u64) -> StorageResult<Vec<AlertRecord>> {
        use entities::alerts::Column;

        let mut query = entities::Alerts::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit);
        if active_only {
            query = query
                .filter(Column::ResolvedAt.is_null())
                .filter(Column::DismissedAt.is_null());
        }
        let rows = query.all(&self.db).await?;
        Ok(rows.into_iter().map(alert_record).collect())
    }
}
