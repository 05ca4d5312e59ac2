use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "cost_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Null for legacy/global rows; set rows are authoritative for the pair.
    #[sea_orm(unique_key = "cost_config_scope")]
    pub connection_id: Option<i64>,
    /// Exact model name, trailing-`*` prefix, or `*`.
    #[sea_orm(unique_key = "cost_config_scope")]
    pub model_pattern: String,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "connection_id", to = "id", on_delete = "Cascade")]
    pub connection: HasOne<super::connections::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
