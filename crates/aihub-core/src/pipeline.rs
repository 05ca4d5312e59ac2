//! The request pipeline: the single entry point shared by the HTTP surface,
//! the workflow engine, and MCP callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use aihub_common::{HubConfig, ServiceKind};
use aihub_provider_core::{AdapterRegistry, ChatRequest};
use aihub_storage::{NewRequest, Storage};

use crate::budget;
use crate::error::HubError;
use crate::executor::{ExecutionOutcome, FallbackInfo, RetryPolicy, execute_chain};
use crate::router::{RouteTarget, route};
use crate::state::AppState;

/// Who invoked the pipeline; workflow steps carry their workflow name into
/// the persisted request row.
#[derive(Debug, Clone)]
pub enum CallOrigin {
    Http,
    Workflow(String),
    Mcp,
}

impl CallOrigin {
    fn workflow_label(&self) -> Option<String> {
        match self {
            CallOrigin::Workflow(name) => Some(name.clone()),
            CallOrigin::Http | CallOrigin::Mcp => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CallOrigin::Http => "http",
            CallOrigin::Workflow(_) => "workflow",
            CallOrigin::Mcp => "mcp",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub trace_id: String,
    pub content: String,
    pub model: String,
    pub provider: ServiceKind,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub fallback: Option<FallbackInfo>,
}

pub struct Pipeline {
    state: Arc<AppState>,
    storage: Arc<dyn Storage>,
    registry: Arc<AdapterRegistry>,
}

impl Pipeline {
    pub fn new(
        state: Arc<AppState>,
        storage: Arc<dyn Storage>,
        registry: Arc<AdapterRegistry>,
    ) -> Self {
        Pipeline {
            state,
            storage,
            registry,
        }
    }

    /// Run the full lifecycle: resolve → route → budget → execute → persist
    /// → health → return. Exactly one request row is appended per
    /// invocation, success or failure; a persistence failure is logged
    /// loudly but never fails an already-produced response.
    pub async fn execute(
        &self,
        request: ChatRequest,
        origin: CallOrigin,
        cancel: CancellationToken,
    ) -> Result<PipelineResponse, HubError> {
        let trace_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let config = self.state.config.load_full();

        tracing::info!(
            event = "pipeline_started",
            trace_id = %trace_id,
            origin = origin.as_str(),
            model = %request.model,
        );

        let outcome = self.run(&request, &cancel, &config, &trace_id).await;
        let latency_ms = started.elapsed().as_millis() as i64;
        let workflow = origin.workflow_label();

        match outcome {
            Ok((exec, chain)) => {
                let target = &chain[exec.served_index];
                let cost_usd = self.attribute_cost(target, &exec, &trace_id);

                let row = NewRequest {
                    model: exec.completion.model.clone(),
                    provider: target.service.as_str().to_string(),
                    prompt_tokens: exec.completion.prompt_tokens,
                    completion_tokens: exec.completion.completion_tokens,
                    cost_usd,
                    latency_ms,
                    success: true,
                    error: None,
                    workflow,
                };
                self.persist(&row, &trace_id).await;

                tracing::info!(
                    event = "pipeline_completed",
                    trace_id = %trace_id,
                    provider = %target.service,
                    attempts = exec.attempts,
                    fallback = exec.fallback.is_some(),
                    cost_usd,
                    latency_ms,
                );

                Ok(PipelineResponse {
                    trace_id,
                    content: exec.completion.content,
                    model: exec.completion.model,
                    provider: target.service,
                    prompt_tokens: exec.completion.prompt_tokens,
                    completion_tokens: exec.completion.completion_tokens,
                    total_tokens: exec.completion.prompt_tokens
                        + exec.completion.completion_tokens,
                    cost_usd,
                    latency_ms,
                    fallback: exec.fallback,
                })
            }
            Err((err, provider_hint)) => {
                let row = NewRequest {
                    model: request.model.clone(),
                    provider: provider_hint,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    cost_usd: 0.0,
                    latency_ms,
                    success: false,
                    error: Some(err.code().to_string()),
                    workflow,
                };
                self.persist(&row, &trace_id).await;

                tracing::warn!(
                    event = "pipeline_failed",
                    trace_id = %trace_id,
                    code = err.code(),
                    latency_ms,
                    error = %err,
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        config: &HubConfig,
        trace_id: &str,
    ) -> Result<(ExecutionOutcome, Vec<RouteTarget>), (HubError, String)> {
        let family = config.routing_rules.resolve(&request.model);
        let family_hint = family.as_str().to_string();

        // 1. Resolve / validate.
        if request.model.trim().is_empty() {
            return Err((
                HubError::BadRequest("model must not be empty".to_string()),
                family_hint,
            ));
        }
        if request.messages.is_empty() {
            return Err((
                HubError::BadRequest("messages must not be empty".to_string()),
                family_hint,
            ));
        }
        if request.max_tokens == 0 {
            return Err((
                HubError::BadRequest("max_tokens must be positive".to_string()),
                family_hint,
            ));
        }

        // 2. Route.
        let connections = self.state.connections();
        let cost_configs = self.state.cost_configs();
        let chain = route(
            &request.model,
            &connections,
            &cost_configs,
            &config.routing_rules,
            &config.fallback_rules,
            &self.registry,
            &self.state.vault,
        );
        if chain.is_empty() {
            return Err((
                HubError::ProviderNotConfigured {
                    model: request.model.clone(),
                },
                family_hint,
            ));
        }
        let primary_hint = chain[0].service.as_str().to_string();
        tracing::info!(
            event = "request_routed",
            trace_id,
            primary = %chain[0].service,
            chain_len = chain.len(),
        );

        // 3. Budget pre-flight, primary connection only. Fallback budgets
        // are accepted best-effort.
        let primary = connections
            .iter()
            .find(|connection| connection.id == chain[0].connection_id)
            .ok_or_else(|| {
                (
                    HubError::Internal("routed connection missing from snapshot".to_string()),
                    primary_hint.clone(),
                )
            })?;
        budget::preflight(self.storage.as_ref(), primary, OffsetDateTime::now_utc())
            .await
            .map_err(|err| (err, primary_hint.clone()))?;

        // 4. Execute under the end-to-end deadline.
        let policy = RetryPolicy::from_config(config);
        let exec_cancel = cancel.child_token();
        let deadline_fired = Arc::new(AtomicBool::new(false));
        let timer = {
            let token = exec_cancel.clone();
            let fired = deadline_fired.clone();
            let deadline = config.request_deadline();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                fired.store(true, Ordering::SeqCst);
                token.cancel();
            })
        };

        let result = execute_chain(
            &chain,
            request,
            &policy,
            &self.state.health,
            &exec_cancel,
            trace_id,
        )
        .await;
        timer.abort();

        match result {
            Ok(exec) => Ok((exec, chain)),
            Err(HubError::Cancelled { .. }) => Err((
                HubError::Cancelled {
                    deadline: deadline_fired.load(Ordering::SeqCst),
                },
                primary_hint,
            )),
            Err(err) => Err((err, primary_hint)),
        }
    }

    fn attribute_cost(&self, target: &RouteTarget, exec: &ExecutionOutcome, trace_id: &str) -> f64 {
        let cost = target
            .rates
            .cost_usd(exec.completion.prompt_tokens, exec.completion.completion_tokens);
        if !target.rates.priced
            && target.service != ServiceKind::Ollama
            && self.state.first_unpriced_sighting(&exec.completion.model)
        {
            tracing::warn!(
                event = "unpriced_model",
                trace_id,
                provider = %target.service,
                model = %exec.completion.model,
            );
        }
        cost
    }

    async fn persist(&self, row: &NewRequest, trace_id: &str) {
        if let Err(err) = self.storage.insert_request(row).await {
            tracing::error!(
                event = "persist_failed",
                trace_id = %trace_id,
                provider = %row.provider,
                model = %row.model,
                error = %err,
            );
        }
    }
}
