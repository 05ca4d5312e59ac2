//! Background loops: active probing of degraded providers and the periodic
//! alert condition checks. Both are explicit tasks bound to the process
//! shutdown token; startup registers them, shutdown cancels and joins.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aihub_common::{BudgetWindow, HubConfig};
use aihub_provider_core::AdapterRegistry;
use aihub_storage::{Storage, StorageResult};

use crate::alerts::{AlertKind, AlertManager};
use crate::router::best_connection;
use crate::state::AppState;

const ALERT_CHECK_PERIOD: Duration = Duration::from_secs(60);
const ERROR_LOOKBACK: time::Duration = time::Duration::minutes(10);
const LATENCY_RECENT_SAMPLES: usize = 10;
const LATENCY_BASELINE_SAMPLES: usize = 100;

pub struct MonitorDeps {
    pub state: Arc<AppState>,
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<AdapterRegistry>,
    pub alerts: Arc<AlertManager>,
}

pub fn spawn_monitors(deps: MonitorDeps, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let probe_deps = MonitorDeps {
        state: deps.state.clone(),
        storage: deps.storage.clone(),
        registry: deps.registry.clone(),
        alerts: deps.alerts.clone(),
    };
    vec![
        tokio::spawn(probe_loop(probe_deps, shutdown.clone())),
        tokio::spawn(alert_check_loop(deps, shutdown)),
    ]
}

/// Actively probe only DEGRADED/ERROR providers; healthy ones are sampled
/// passively by real traffic.
async fn probe_loop(deps: MonitorDeps, shutdown: CancellationToken) {
    loop {
        let period = Duration::from_secs(
            deps.state.config.load().health_probe_period_sec.max(1),
        );
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }

        let unhealthy = deps.state.health.unhealthy_services();
        if unhealthy.is_empty() {
            continue;
        }
        let config = deps.state.config.load_full();
        let connections = deps.state.connections();

        for service in unhealthy {
            let Some(connection) = best_connection(&connections, service) else {
                continue;
            };
            let Some(adapter) = deps.registry.get(service) else {
                continue;
            };
            let target = crate::router::decrypt_target(connection, &deps.state.vault);

            match adapter.probe(&target, config.probe_timeout()).await {
                Ok(report) => {
                    let status = deps.state.health.record_probe(service, report.ok, "");
                    tracing::info!(
                        event = "health_probe",
                        provider = %service,
                        ok = report.ok,
                        latency_ms = report.latency_ms,
                        status = ?status,
                    );
                }
                Err(err) => {
                    deps.state.health.record_probe(service, false, err.kind_str());
                    tracing::warn!(
                        event = "health_probe_failed",
                        provider = %service,
                        kind = err.kind_str(),
                        error = %err,
                    );
                }
            }
        }
    }
    tracing::debug!(event = "probe_loop_stopped");
}

/// Evaluate the three alert conditions per enabled connection, raising or
/// auto-resolving as each condition enters or clears.
async fn alert_check_loop(deps: MonitorDeps, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(ALERT_CHECK_PERIOD) => {}
        }

        let config = deps.state.config.load_full();
        if !config.alert_enabled {
            continue;
        }
        if let Err(err) = run_alert_checks(&deps, &config).await {
            tracing::error!(event = "alert_check_failed", error = %err);
        }
    }
    tracing::debug!(event = "alert_check_loop_stopped");
}

async fn run_alert_checks(deps: &MonitorDeps, config: &HubConfig) -> StorageResult<()> {
    let connections = deps.state.connections();

    for connection in connections
        .iter()
        .filter(|connection| connection.enabled && connection.service.is_chat())
    {
        let service = connection.service.as_str();

        // Consecutive errors.
        let threshold = config.alert_consecutive_error_threshold as usize;
        let since = OffsetDateTime::now_utc() - ERROR_LOOKBACK;
        let outcomes = deps
            .storage
            .recent_outcomes(service, threshold as u64, since)
            .await?;
        if consecutive_failures(&outcomes, threshold) {
            deps.alerts
                .raise(
                    connection.id,
                    &connection.name,
                    AlertKind::ConsecutiveErrors,
                    format!(
                        "{} has {threshold} consecutive request failures.",
                        connection.name
                    ),
                    Some(serde_json::json!({
                        "threshold": threshold,
                        "lookback_minutes": 10,
                    })),
                )
                .await?;
        } else {
            deps.alerts
                .clear(connection.id, AlertKind::ConsecutiveErrors)
                .await?;
        }

        // Latency spike.
        let latencies = deps
            .storage
            .recent_latencies(
                service,
                (LATENCY_RECENT_SAMPLES + LATENCY_BASELINE_SAMPLES) as u64,
            )
            .await?;
        let verdict = latency_spike(&latencies, config.alert_latency_multiplier);
        deps.state
            .health
            .record_latency_sample(connection.service, verdict.spiked);
        if verdict.spiked {
            deps.alerts
                .raise(
                    connection.id,
                    &connection.name,
                    AlertKind::LatencySpike,
                    format!(
                        "{} latency spike: {:.0}ms rolling mean (baseline {:.0}ms, threshold {}x).",
                        connection.name,
                        verdict.recent_mean_ms,
                        verdict.baseline_median_ms,
                        config.alert_latency_multiplier,
                    ),
                    Some(serde_json::json!({
                        "recent_mean_ms": verdict.recent_mean_ms,
                        "baseline_median_ms": verdict.baseline_median_ms,
                        "multiplier": config.alert_latency_multiplier,
                    })),
                )
                .await?;
        } else {
            deps.alerts
                .clear(connection.id, AlertKind::LatencySpike)
                .await?;
        }

        // Budget threshold.
        let mut breached = None;
        for window in BudgetWindow::ALL {
            let limit = connection.limit_for(window);
            if limit <= 0.0 {
                continue;
            }
            let spent = deps.storage.aggregate_spend(service, window).await?;
            let percent = spent / limit * 100.0;
            if percent >= config.alert_budget_threshold_percent {
                breached = Some((window, spent, limit, percent));
                break;
            }
        }
        if let Some((window, spent, limit, percent)) = breached {
            deps.alerts
                .raise(
                    connection.id,
                    &connection.name,
                    AlertKind::BudgetThreshold,
                    format!(
                        "{} {window} budget at {percent:.0}%: ${spent:.2} of ${limit:.2}.",
                        connection.name
                    ),
                    Some(serde_json::json!({
                        "window": window.as_str(),
                        "spent_usd": spent,
                        "limit_usd": limit,
                        "percent": percent,
                    })),
                )
                .await?;
        } else {
            deps.alerts
                .clear(connection.id, AlertKind::BudgetThreshold)
                .await?;
        }
    }

    Ok(())
}

fn consecutive_failures(outcomes: &[bool], threshold: usize) -> bool {
    threshold > 0 && outcomes.len() >= threshold && outcomes.iter().all(|ok| !ok)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LatencyVerdict {
    spiked: bool,
    recent_mean_ms: f64,
    baseline_median_ms: f64,
}

/// `latencies` is newest-first. Spike when the mean of the last 10
/// successful latencies reaches `multiplier` times the median of the prior
/// (up to 100) samples. A baseline shorter than the recent window is too
/// noisy to judge.
fn latency_spike(latencies: &[i64], multiplier: f64) -> LatencyVerdict {
    let calm = LatencyVerdict {
        spiked: false,
        recent_mean_ms: 0.0,
        baseline_median_ms: 0.0,
    };
    if latencies.len() < LATENCY_RECENT_SAMPLES * 2 {
        return calm;
    }
    let recent = &latencies[..LATENCY_RECENT_SAMPLES];
    let baseline = &latencies[LATENCY_RECENT_SAMPLES..];

    let recent_mean = recent.iter().sum::<i64>() as f64 / recent.len() as f64;
    let mut sorted: Vec<i64> = baseline.to_vec();
    sorted.sort_unstable();
    let baseline_median = if sorted.len() % 2 == 1 {
        sorted[sorted.len() / 2] as f64
    } else {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) as f64 / 2.0
    };

    if baseline_median <= 0.0 {
        return calm;
    }
    LatencyVerdict {
        spiked: recent_mean >= baseline_median * multiplier,
        recent_mean_ms: recent_mean,
        baseline_median_ms: baseline_median,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_requires_full_window() {
        assert!(consecutive_failures(&[false, false, false], 3));
        assert!(!consecutive_failures(&[false, false], 3));
        assert!(!consecutive_failures(&[false, true, false], 3));
        assert!(!consecutive_failures(&[], 3));
    }

    #[test]
    fn latency_spike_detects_three_times_baseline() {
        // 10 recent samples at ~900ms over a 100-sample baseline of 300ms.
        let mut latencies = vec![900_i64; 10];
        latencies.extend(vec![300_i64; 100]);
        let verdict = latency_spike(&latencies, 3.0);
        assert!(verdict.spiked);
        assert_eq!(verdict.recent_mean_ms, 900.0);
        assert_eq!(verdict.baseline_median_ms, 300.0);
    }

    #[test]
    fn latency_spike_quiet_below_multiplier() {
        let mut latencies = vec![800_i64; 10];
        latencies.extend(vec![300_i64; 100]);
        assert!(!latency_spike(&latencies, 3.0).spiked);
    }

    #[test]
    fn latency_spike_needs_stable_baseline() {
        // Only 5 baseline samples behind 10 recents.
        let mut latencies = vec![900_i64; 10];
        latencies.extend(vec![10_i64; 5]);
        assert!(!latency_spike(&latencies, 3.0).spiked);
    }

    #[test]
    fn latency_median_is_robust_to_one_outlier() {
        let mut latencies = vec![900_i64; 10];
        let mut baseline = vec![300_i64; 99];
        baseline.push(100_000);
        latencies.extend(baseline);
        let verdict = latency_spike(&latencies, 3.0);
        assert_eq!(verdict.baseline_median_ms, 300.0);
        assert!(verdict.spiked);
    }
}
