pub mod entities;
mod seaorm;
mod storage;

pub use seaorm::SeaOrmStorage;
pub use storage::{
    AlertRecord, BudgetLimitsRecord, ConnectionRecord, ConnectionUpdate, CostConfigRecord,
    NewAlert, NewApiCall, NewConnection, NewCostConfig, NewRequest, RequestRecord, StatSummary,
    Storage, StorageError, StorageResult, UsageBucket, UsageGranularity,
};
