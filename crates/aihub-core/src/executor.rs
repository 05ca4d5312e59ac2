//! Retry/fallback executor: walks the provider chain with bounded
//! exponential backoff and cooperative cancellation.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use aihub_common::{HubConfig, ServiceKind};
use aihub_provider_core::{AdapterError, ChatRequest, RawCompletion};

use crate::error::HubError;
use crate::health::HealthTracker;
use crate::router::RouteTarget;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base: Duration,
    pub growth: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &HubConfig) -> Self {
        RetryPolicy {
            enabled: config.retry_enabled,
            max_attempts: config.retry_max_attempts.max(1),
            base: Duration::from_secs_f64(config.retry_base_sec.max(0.0)),
            growth: config.retry_growth.max(1.0),
        }
    }

    pub fn attempts_per_provider(&self) -> u32 {
        if self.enabled { self.max_attempts } else { 1 }
    }

    /// `backoff(n) = base * growth^(n-1)`, n 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.growth.powi(attempt.saturating_sub(1) as i32);
        self.base.mul_f64(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FallbackInfo {
    pub original: ServiceKind,
    pub actual: ServiceKind,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub completion: RawCompletion,
    /// Index into the chain of the target that served.
    pub served_index: usize,
    /// Total attempts across all providers.
    pub attempts: u32,
    pub fallback: Option<FallbackInfo>,
}

/// Walk the chain. Auth/bad-request failures abandon a provider at once;
/// rate-limit and transient failures retry with backoff, honouring
/// Retry-After when it exceeds the backoff. Health outcomes are recorded at
/// success and at provider exhaustion.
pub async fn execute_chain(
    chain: &[RouteTarget],
    request: &ChatRequest,
    policy: &RetryPolicy,
    health: &HealthTracker,
    cancel: &CancellationToken,
    trace_id: &str,
) -> Result<ExecutionOutcome, HubError> {
    let mut total_attempts = 0u32;
    let mut last_error: Option<(AdapterError, ServiceKind)> = None;

    for (index, target) in chain.iter().enumerate() {
        let attempts_allowed = policy.attempts_per_provider();
        let mut terminal: Option<AdapterError> = None;

        for attempt in 1..=attempts_allowed {
            if cancel.is_cancelled() {
                return Err(HubError::Cancelled { deadline: false });
            }
            total_attempts += 1;

            match target
                .adapter
                .complete(&target.target, request, cancel)
                .await
            {
                Ok(completion) => {
                    health.record_success(target.service);
                    let fallback = (index > 0).then(|| FallbackInfo {
                        original: chain[0].service,
                        actual: target.service,
                    });
                    if let Some(info) = &fallback {
                        tracing::info!(
                            event = "fallback_served",
                            trace_id,
                            original_provider = %info.original,
                            actual_provider = %info.actual,
                            attempts = total_attempts,
                        );
                    }
                    return Ok(ExecutionOutcome {
                        completion,
                        served_index: index,
                        attempts: total_attempts,
                        fallback,
                    });
                }
                Err(AdapterError::Cancelled) => {
                    return Err(HubError::Cancelled { deadline: false });
                }
                Err(err) if err.skips_provider() => {
                    tracing::warn!(
                        event = "provider_skipped",
                        trace_id,
                        provider = %target.service,
                        kind = err.kind_str(),
                        attempt,
                        error = %err,
                    );
                    terminal = Some(err);
                    break;
                }
                Err(err) => {
                    if attempt == attempts_allowed {
                        tracing::warn!(
                            event = "provider_exhausted",
                            trace_id,
                            provider = %target.service,
                            kind = err.kind_str(),
                            attempts = attempt,
                        );
                        terminal = Some(err);
                        break;
                    }

                    let backoff = policy.backoff(attempt);
                    let sleep_for = match err.retry_after() {
                        Some(retry_after) if retry_after > backoff => retry_after,
                        _ => backoff,
                    };
                    tracing::info!(
                        event = "retry_backoff",
                        trace_id,
                        provider = %target.service,
                        kind = err.kind_str(),
                        attempt,
                        sleep_ms = sleep_for.as_millis() as u64,
                    );
                    tokio::select! {
                        () = tokio::time::sleep(sleep_for) => {}
                        () = cancel.cancelled() => {
                            return Err(HubError::Cancelled { deadline: false });
                        }
                    }
                }
            }
        }

        if let Some(err) = terminal {
            health.record_failure(target.service, err.kind_str());
            last_error = Some((err, target.service));
        }
    }

    let (err, service) = last_error.ok_or_else(|| {
        HubError::Internal("executor invoked with an empty provider chain".to_string())
    })?;
    Err(HubError::Upstream {
        kind: err.kind_str(),
        provider: service.as_str().to_string(),
        attempts: total_attempts,
        detail: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use aihub_provider_core::{AdapterResult, AdapterTarget, ChatAdapter, ChatMessage, ProbeReport};

    // Local alias to keep signatures short.
    type Script = Mutex<VecDeque<AdapterResult<RawCompletion>>>;

    struct ScriptedAdapter {
        service: ServiceKind,
        script: Script,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(
            service: ServiceKind,
            outcomes: Vec<AdapterResult<RawCompletion>>,
        ) -> Arc<Self> {
            Arc::new(ScriptedAdapter {
                service,
                script: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatAdapter for ScriptedAdapter {
        fn service(&self) -> ServiceKind {
            self.service
        }

        async fn complete(
            &self,
            _target: &AdapterTarget,
            _request: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> AdapterResult<RawCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(AdapterError::Transient {
                        status: None,
                        message: "script exhausted".to_string(),
                    })
                })
        }

        async fn list_models(&self, _target: &AdapterTarget) -> AdapterResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn probe(
            &self,
            _target: &AdapterTarget,
            _timeout: Duration,
        ) -> AdapterResult<ProbeReport> {
            Ok(ProbeReport {
                ok: true,
                latency_ms: 1,
            })
        }
    }

    fn completion() -> RawCompletion {
        RawCompletion {
            content: "hello".to_string(),
            model: "test-model".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
        }
    }

    fn target_for(adapter: Arc<ScriptedAdapter>, id: i64) -> RouteTarget {
        RouteTarget {
            connection_id: id,
            connection_name: format!("conn-{id}"),
            service: adapter.service(),
            adapter,
            target: AdapterTarget::default(),
            rates: crate::router::CostRates {
                input_per_1m: 0.0,
                output_per_1m: 0.0,
                priced: true,
            },
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 16,
            temperature: 0.7,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts,
            base: Duration::from_millis(1),
            growth: 2.0,
        }
    }

    fn rate_limited() -> AdapterError {
        AdapterError::RateLimited {
            retry_after: None,
            message: "429".to_string(),
        }
    }

    #[test]
    fn backoff_schedule_follows_formula() {
        let policy = RetryPolicy {
            enabled: true,
            max_attempts: 3,
            base: Duration::from_secs(1),
            growth: 5.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(5));
        assert_eq!(policy.backoff(3), Duration::from_secs(25));
    }

    #[tokio::test]
    async fn first_attempt_success_short_circuits() {
        let adapter = ScriptedAdapter::new(ServiceKind::Ollama, vec![Ok(completion())]);
        let chain = vec![target_for(adapter.clone(), 1)];
        let health = HealthTracker::new(3);

        let outcome = execute_chain(
            &chain,
            &request(),
            &fast_policy(3),
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.served_index, 0);
        assert!(outcome.fallback.is_none());
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limited_primary_falls_back() {
        let primary = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![Err(rate_limited()), Err(rate_limited()), Err(rate_limited())],
        );
        let fallback = ScriptedAdapter::new(ServiceKind::Ollama, vec![Ok(completion())]);
        let chain = vec![target_for(primary.clone(), 1), target_for(fallback.clone(), 2)];
        let health = HealthTracker::new(3);

        let outcome = execute_chain(
            &chain,
            &request(),
            &fast_policy(3),
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap();

        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.served_index, 1);
        let info = outcome.fallback.unwrap();
        assert_eq!(info.original, ServiceKind::OpenAi);
        assert_eq!(info.actual, ServiceKind::Ollama);
    }

    #[tokio::test]
    async fn auth_failure_skips_provider_without_retry() {
        let primary = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![Err(AdapterError::Auth {
                status: 401,
                message: "bad key".to_string(),
            })],
        );
        let fallback = ScriptedAdapter::new(ServiceKind::Ollama, vec![Ok(completion())]);
        let chain = vec![target_for(primary.clone(), 1), target_for(fallback, 2)];
        let health = HealthTracker::new(3);

        let outcome = execute_chain(
            &chain,
            &request(),
            &fast_policy(3),
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap();

        // One auth attempt, no retries against the dead key.
        assert_eq!(primary.calls(), 1);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_terminal_kind() {
        let only = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![
                Err(AdapterError::Transient {
                    status: Some(500),
                    message: "boom".to_string(),
                }),
                Err(AdapterError::Transient {
                    status: Some(502),
                    message: "boom again".to_string(),
                }),
            ],
        );
        let chain = vec![target_for(only, 1)];
        let health = HealthTracker::new(3);

        let err = execute_chain(
            &chain,
            &request(),
            &fast_policy(2),
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap_err();

        match err {
            HubError::Upstream {
                kind,
                attempts,
                provider,
                ..
            } => {
                assert_eq!(kind, "upstream_transient");
                assert_eq!(attempts, 2);
                assert_eq!(provider, "openai");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_disabled_means_single_attempt() {
        let adapter = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![Err(rate_limited()), Ok(completion())],
        );
        let chain = vec![target_for(adapter.clone(), 1)];
        let health = HealthTracker::new(3);
        let policy = RetryPolicy {
            enabled: false,
            max_attempts: 3,
            base: Duration::from_millis(1),
            growth: 2.0,
        };

        let err = execute_chain(
            &chain,
            &request(),
            &policy,
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap_err();

        assert_eq!(adapter.calls(), 1);
        assert!(matches!(err, HubError::Upstream { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_before_next_sleep() {
        let adapter = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![Err(rate_limited()), Ok(completion())],
        );
        let chain = vec![target_for(adapter.clone(), 1)];
        let health = HealthTracker::new(3);
        // Long backoff so the test only passes when cancellation wins.
        let policy = RetryPolicy {
            enabled: true,
            max_attempts: 3,
            base: Duration::from_secs(30),
            growth: 5.0,
        };

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = execute_chain(&chain, &request(), &policy, &health, &cancel, "t")
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::Cancelled { deadline: false }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn retry_after_longer_than_backoff_is_honoured() {
        let adapter = ScriptedAdapter::new(
            ServiceKind::OpenAi,
            vec![
                Err(AdapterError::RateLimited {
                    retry_after: Some(Duration::from_millis(80)),
                    message: "429".to_string(),
                }),
                Ok(completion()),
            ],
        );
        let chain = vec![target_for(adapter, 1)];
        let health = HealthTracker::new(3);
        let policy = fast_policy(3); // 1ms backoff, Retry-After should win

        let started = std::time::Instant::now();
        let outcome = execute_chain(
            &chain,
            &request(),
            &policy,
            &health,
            &CancellationToken::new(),
            "t",
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
