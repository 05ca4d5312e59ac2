//! Alert creation, deduplication, auto-resolve, and channel dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use aihub_storage::{AlertRecord, NewAlert, Storage, StorageResult};

/// How long a resolved alert keeps suppressing re-raises for its dedup key.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Capacity of the fan-out channel. A slow consumer lags and drops the
/// oldest payloads rather than blocking the monitor.
const DISPATCH_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    #[serde(rename = "consecutive-errors")]
    ConsecutiveErrors,
    #[serde(rename = "latency-spike")]
    LatencySpike,
    #[serde(rename = "budget-threshold")]
    BudgetThreshold,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::ConsecutiveErrors => "consecutive-errors",
            AlertKind::LatencySpike => "latency-spike",
            AlertKind::BudgetThreshold => "budget-threshold",
        }
    }

    pub fn severity(&self) -> &'static str {
        match self {
            AlertKind::ConsecutiveErrors => "error",
            AlertKind::LatencySpike | AlertKind::BudgetThreshold => "warning",
        }
    }
}

/// Wire shape pushed to dispatch channels.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub id: i64,
    #[serde(rename = "type")]
    pub payload_type: &'static str,
    pub connection_id: i64,
    pub connection_name: String,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
}

impl AlertPayload {
    fn from_record(record: &AlertRecord, connection_name: &str) -> Self {
        AlertPayload {
            id: record.id,
            payload_type: "hub_alert",
            connection_id: record.connection_id,
            connection_name: connection_name.to_string(),
            kind: record.kind.clone(),
            severity: record.severity.clone(),
            message: record.message.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
        }
    }
}

/// One delivery target (webhook endpoint, desktop notifier, ...).
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, payload: &AlertPayload) -> Result<(), String>;
}

/// Broadcast fan-out hub. Each attached channel gets its own consumer task;
/// a channel that falls more than `DISPATCH_CAPACITY` behind loses the
/// oldest payloads (broadcast lag semantics).
#[derive(Clone)]
pub struct AlertHub {
    tx: broadcast::Sender<AlertPayload>,
}

impl AlertHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DISPATCH_CAPACITY);
        AlertHub { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertPayload> {
        self.tx.subscribe()
    }

    pub fn publish(&self, payload: AlertPayload) {
        // No receivers is fine: dashboard polling covers the banner surface.
        let _ = self.tx.send(payload);
    }

    /// Spawn the consumer loop for one channel, bound to process shutdown.
    pub fn attach_channel(&self, channel: Arc<dyn AlertChannel>, shutdown: CancellationToken) {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(payload) => {
                            if let Err(err) = channel.send(&payload).await {
                                tracing::warn!(
                                    event = "alert_dispatch_failed",
                                    channel = channel.name(),
                                    alert_id = payload.id,
                                    error = %err,
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(dropped)) => {
                            tracing::warn!(
                                event = "alert_dispatch_lagged",
                                channel = channel.name(),
                                dropped,
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}

impl Default for AlertHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates, deduplicates, resolves, and dispatches alerts. All durable
/// state lives in the alerts table; the hub is delivery-only.
pub struct AlertManager {
    storage: Arc<dyn Storage>,
    hub: AlertHub,
}

impl AlertManager {
    pub fn new(storage: Arc<dyn Storage>, hub: AlertHub) -> Self {
        AlertManager { storage, hub }
    }

    pub fn hub(&self) -> &AlertHub {
        &self.hub
    }

    /// Raise an alert unless the dedup key already has an active one (or a
    /// recent one inside the suppression window). Dispatches on insert.
    pub async fn raise(
        &self,
        connection_id: i64,
        connection_name: &str,
        kind: AlertKind,
        message: String,
        metadata: Option<serde_json::Value>,
    ) -> StorageResult<Option<AlertRecord>> {
        let candidate = NewAlert {
            connection_id,
            kind: kind.as_str().to_string(),
            severity: kind.severity().to_string(),
            message,
            metadata,
        };
        let Some(record) = self
            .storage
            .alert_upsert_active(&candidate, DEDUP_WINDOW)
            .await?
        else {
            tracing::debug!(
                event = "alert_deduplicated",
                connection_id,
                kind = kind.as_str(),
            );
            return Ok(None);
        };

        tracing::warn!(
            event = "alert_created",
            alert_id = record.id,
            connection_id,
            kind = kind.as_str(),
            severity = record.severity,
            message = %record.message,
        );
        self.hub
            .publish(AlertPayload::from_record(&record, connection_name));
        Ok(Some(record))
    }

    /// Auto-resolve any active alert for the key; called when a condition
    /// no longer holds.
    pub async fn clear(&self, connection_id: i64, kind: AlertKind) -> StorageResult<u64> {
        let resolved = self
            .storage
            .alert_resolve(connection_id, kind.as_str())
            .await?;
        if resolved > 0 {
            tracing::info!(
                event = "alert_resolved",
                connection_id,
                kind = kind.as_str(),
                count = resolved,
            );
        }
        Ok(resolved)
    }
}

/// POST the JSON payload to a configured webhook endpoint.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        WebhookChannel {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url,
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), String> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()));
        }
        Ok(())
    }
}

/// Best-effort desktop notification via the platform notifier binary.
pub struct DesktopChannel;

#[async_trait]
impl AlertChannel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), String> {
        let title = format!("AI Hub: {} alert", payload.severity);
        let status = if std::env::consts::OS == "macos" {
            let script = format!(
                "display notification {} with title {}",
                applescript_quote(&payload.message),
                applescript_quote(&title),
            );
            tokio::process::Command::new("osascript")
                .arg("-e")
                .arg(script)
                .status()
                .await
        } else {
            tokio::process::Command::new("notify-send")
                .arg(&title)
                .arg(&payload.message)
                .status()
                .await
        };
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("notifier exited with {status}")),
            Err(err) => Err(err.to_string()),
        }
    }
}

fn applescript_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_and_severities() {
        assert_eq!(AlertKind::ConsecutiveErrors.as_str(), "consecutive-errors");
        assert_eq!(AlertKind::ConsecutiveErrors.severity(), "error");
        assert_eq!(AlertKind::LatencySpike.severity(), "warning");
        assert_eq!(AlertKind::BudgetThreshold.severity(), "warning");
    }

    #[test]
    fn applescript_quoting_escapes_injection() {
        assert_eq!(applescript_quote(r#"a "b" c"#), r#""a \"b\" c""#);
    }

    #[tokio::test]
    async fn hub_delivers_to_subscribers() {
        let hub = AlertHub::new();
        let mut rx = hub.subscribe();
        hub.publish(AlertPayload {
            id: 1,
            payload_type: "hub_alert",
            connection_id: 2,
            connection_name: "openai".to_string(),
            kind: "latency-spike".to_string(),
            severity: "warning".to_string(),
            message: "slow".to_string(),
            metadata: None,
            created_at: OffsetDateTime::now_utc(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, 1);
        assert_eq!(received.kind, "latency-spike");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let hub = AlertHub::new();
        hub.publish(AlertPayload {
            id: 9,
            payload_type: "hub_alert",
            connection_id: 1,
            connection_name: "x".to_string(),
            kind: "budget-threshold".to_string(),
            severity: "warning".to_string(),
            message: "m".to_string(),
            metadata: None,
            created_at: OffsetDateTime::now_utc(),
        });
    }
}
