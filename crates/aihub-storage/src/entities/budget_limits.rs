use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Singleton row (id = 1) holding the dashboard-default global limits.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budget_limits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
