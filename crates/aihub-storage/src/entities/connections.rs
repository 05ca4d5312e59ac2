use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// Service key: openai / anthropic / ollama / github / custom.
    pub service: String,
    pub category: Option<String>,
    pub base_url: Option<String>,
    /// Vault ciphertext; empty string when the credential is unset.
    pub api_key_enc: Option<String>,
    pub token_enc: Option<String>,
    pub credential_file_enc: Option<String>,
    /// Model the `local` alias resolves to when this connection serves it.
    pub default_model: Option<String>,
    pub enabled: bool,
    pub is_default: bool,
    /// 0 means no limit for that window.
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub budget_override_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub cost_configs: HasMany<super::cost_configs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
