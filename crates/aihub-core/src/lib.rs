pub mod alerts;
pub mod bootstrap;
pub mod budget;
pub mod error;
pub mod executor;
pub mod health;
pub mod monitor;
pub mod pipeline;
pub mod read_model;
pub mod router;
pub mod state;

pub use bootstrap::{Bootstrap, CliArgs, bootstrap, bootstrap_from_env};
pub use error::HubError;
pub use pipeline::{CallOrigin, Pipeline, PipelineResponse};
pub use state::AppState;
