use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Append-only log of LLM calls through the pipeline. Never mutated.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub model: String,
    /// Service key of the connection that actually served (or last failed).
    pub provider: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub workflow: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
