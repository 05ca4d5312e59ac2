use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Append-only log of non-LLM upstream calls (VCS, media, webhooks).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_calls")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub service: String,
    pub operation: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<i32>,
    pub latency_ms: i64,
    pub cost_usd: f64,
    pub metadata: Option<Json>,
    pub success: bool,
    pub error: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
