//! In-memory provider health state.
//!
//! Transient by design: a restart begins with every provider HEALTHY and the
//! probe loop plus live traffic re-establish reality within one cycle.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use time::OffsetDateTime;

use aihub_common::ServiceKind;

const SUCCESS_THRESHOLD: u32 = 3;
const LATENCY_STRIKE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub latency_strikes: u32,
    pub last_failure_reason: Option<String>,
    pub last_probe_at: Option<OffsetDateTime>,
    pub last_probe_ok: Option<bool>,
    pub degraded_since: Option<OffsetDateTime>,
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            latency_strikes: 0,
            last_failure_reason: None,
            last_probe_at: None,
            last_probe_ok: None,
            degraded_since: None,
        }
    }
}

/// Shared tracker; a single mutex guards the whole map. Updates are one per
/// request and one per probe, contention is negligible.
pub struct HealthTracker {
    inner: Mutex<HashMap<ServiceKind, HealthState>>,
    error_threshold: u32,
}

impl HealthTracker {
    pub fn new(error_threshold: u32) -> Self {
        HealthTracker {
            inner: Mutex::new(HashMap::new()),
            error_threshold: error_threshold.max(1),
        }
    }

    /// Record a successful call. Returns true when the provider just
    /// recovered (left DEGRADED/ERROR).
    pub fn record_success(&self, service: ServiceKind) -> bool {
        let mut inner = self.lock();
        let state = inner.entry(service).or_default();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        let recovered = state.status != HealthStatus::Healthy
            && state.consecutive_successes >= SUCCESS_THRESHOLD;
        if recovered {
            tracing::info!(
                event = "provider_recovered",
                provider = %service,
                consecutive_successes = state.consecutive_successes,
            );
            state.status = HealthStatus::Healthy;
            state.degraded_since = None;
            state.last_failure_reason = None;
            state.consecutive_successes = 0;
        }
        recovered
    }

    /// Record a failed call; returns the status after the transition.
    pub fn record_failure(&self, service: ServiceKind, reason: &str) -> HealthStatus {
        let mut inner = self.lock();
        let state = inner.entry(service).or_default();
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.last_failure_reason = Some(reason.to_string());

        match state.status {
            HealthStatus::Healthy if state.consecutive_failures >= self.error_threshold => {
                state.status = HealthStatus::Degraded;
                state.degraded_since = Some(OffsetDateTime::now_utc());
                tracing::warn!(
                    event = "provider_degraded",
                    provider = %service,
                    reason,
                    consecutive_failures = state.consecutive_failures,
                );
            }
            HealthStatus::Degraded
                if state.consecutive_failures >= self.error_threshold * 2 =>
            {
                state.status = HealthStatus::Error;
                tracing::error!(
                    event = "provider_error",
                    provider = %service,
                    reason,
                    consecutive_failures = state.consecutive_failures,
                );
            }
            _ => {}
        }
        state.status
    }

    /// Feed one alert-cycle latency observation. Three consecutive spiking
    /// samples degrade a healthy provider.
    pub fn record_latency_sample(&self, service: ServiceKind, spiked: bool) {
        let mut inner = self.lock();
        let state = inner.entry(service).or_default();
        if !spiked {
            state.latency_strikes = 0;
            return;
        }
        state.latency_strikes += 1;
        if state.status == HealthStatus::Healthy
            && state.latency_strikes >= LATENCY_STRIKE_THRESHOLD
        {
            state.status = HealthStatus::Degraded;
            state.degraded_since = Some(OffsetDateTime::now_utc());
            state.last_failure_reason = Some("sustained latency spike".to_string());
            tracing::warn!(
                event = "provider_degraded",
                provider = %service,
                reason = "sustained latency spike",
            );
        }
    }

    /// Record a probe outcome. Probe successes count toward recovery exactly
    /// like request successes.
    pub fn record_probe(&self, service: ServiceKind, ok: bool, reason: &str) -> HealthStatus {
        {
            let mut inner = self.lock();
            let state = inner.entry(service).or_default();
            state.last_probe_at = Some(OffsetDateTime::now_utc());
            state.last_probe_ok = Some(ok);
        }
        if ok {
            self.record_success(service);
        } else {
            self.record_failure(service, reason);
        }
        self.status(service)
    }

    pub fn status(&self, service: ServiceKind) -> HealthStatus {
        self.lock()
            .get(&service)
            .map(|state| state.status)
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Services currently worth actively probing.
    pub fn unhealthy_services(&self) -> Vec<ServiceKind> {
        self.lock()
            .iter()
            .filter(|(_, state)| state.status != HealthStatus::Healthy)
            .map(|(service, _)| *service)
            .collect()
    }

    pub fn snapshot(&self) -> HashMap<ServiceKind, HealthState> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ServiceKind, HealthState>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy() {
        let tracker = HealthTracker::new(3);
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Healthy);
        assert!(tracker.unhealthy_services().is_empty());
    }

    #[test]
    fn degrades_at_threshold_and_errors_at_double() {
        let tracker = HealthTracker::new(3);
        for _ in 0..2 {
            tracker.record_failure(ServiceKind::OpenAi, "boom");
        }
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Healthy);

        tracker.record_failure(ServiceKind::OpenAi, "boom");
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Degraded);

        for _ in 0..3 {
            tracker.record_failure(ServiceKind::OpenAi, "boom");
        }
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Error);
    }

    #[test]
    fn three_successes_recover() {
        let tracker = HealthTracker::new(1);
        tracker.record_failure(ServiceKind::Ollama, "down");
        assert_eq!(tracker.status(ServiceKind::Ollama), HealthStatus::Degraded);

        assert!(!tracker.record_success(ServiceKind::Ollama));
        assert!(!tracker.record_success(ServiceKind::Ollama));
        assert!(tracker.record_success(ServiceKind::Ollama));
        assert_eq!(tracker.status(ServiceKind::Ollama), HealthStatus::Healthy);
    }

    #[test]
    fn success_resets_failure_streak() {
        let tracker = HealthTracker::new(3);
        tracker.record_failure(ServiceKind::Anthropic, "x");
        tracker.record_failure(ServiceKind::Anthropic, "x");
        tracker.record_success(ServiceKind::Anthropic);
        tracker.record_failure(ServiceKind::Anthropic, "x");
        tracker.record_failure(ServiceKind::Anthropic, "x");
        assert_eq!(tracker.status(ServiceKind::Anthropic), HealthStatus::Healthy);
    }

    #[test]
    fn latency_strikes_degrade_after_three_samples() {
        let tracker = HealthTracker::new(3);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Healthy);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Degraded);
    }

    #[test]
    fn calm_sample_resets_latency_strikes() {
        let tracker = HealthTracker::new(3);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        tracker.record_latency_sample(ServiceKind::OpenAi, false);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        tracker.record_latency_sample(ServiceKind::OpenAi, true);
        assert_eq!(tracker.status(ServiceKind::OpenAi), HealthStatus::Healthy);
    }

    #[test]
    fn probe_outcomes_feed_recovery() {
        let tracker = HealthTracker::new(1);
        tracker.record_failure(ServiceKind::OpenAi, "down");
        tracker.record_probe(ServiceKind::OpenAi, true, "");
        tracker.record_probe(ServiceKind::OpenAi, true, "");
        let status = tracker.record_probe(ServiceKind::OpenAi, true, "");
        assert_eq!(status, HealthStatus::Healthy);
        let snap = tracker.snapshot();
        assert_eq!(snap[&ServiceKind::OpenAi].last_probe_ok, Some(true));
    }
}
