use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Alert rows are kept after their connection is deleted; `connection_id`
/// is therefore a plain column, not a foreign key.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
    pub dismissed_at: Option<OffsetDateTime>,
    pub connection_id: i64,
    /// consecutive-errors / latency-spike / budget-threshold.
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub metadata: Option<Json>,
}

impl ActiveModelBehavior for ActiveModel {}
