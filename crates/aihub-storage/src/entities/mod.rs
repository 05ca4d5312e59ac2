pub mod alerts;
pub mod api_calls;
pub mod budget_limits;
pub mod connections;
pub mod cost_configs;
pub mod requests;

pub use alerts::Entity as Alerts;
pub use api_calls::Entity as ApiCalls;
pub use budget_limits::Entity as BudgetLimits;
pub use connections::Entity as Connections;
pub use cost_configs::Entity as CostConfigs;
pub use requests::Entity as Requests;
