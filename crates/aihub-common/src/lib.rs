use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

mod rules;

pub use rules::{FallbackRules, RoutingRules, RuleParseError};

/// String key identifying an upstream service family.
///
/// Chat routing only ever targets `openai`, `anthropic`, `ollama` and
/// `custom`; `github` exists so non-LLM api_call rows share the same keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    OpenAi,
    Anthropic,
    Ollama,
    Github,
    Custom,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::OpenAi => "openai",
            ServiceKind::Anthropic => "anthropic",
            ServiceKind::Ollama => "ollama",
            ServiceKind::Github => "github",
            ServiceKind::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(ServiceKind::OpenAi),
            "anthropic" => Some(ServiceKind::Anthropic),
            "ollama" | "local" => Some(ServiceKind::Ollama),
            "github" => Some(ServiceKind::Github),
            "custom" => Some(ServiceKind::Custom),
            _ => None,
        }
    }

    /// Whether connections of this kind can serve chat completions.
    pub fn is_chat(&self) -> bool {
        !matches!(self, ServiceKind::Github)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling spend window used by budget enforcement and aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindow {
    Daily,
    Weekly,
    Monthly,
}

impl BudgetWindow {
    pub const ALL: [BudgetWindow; 3] = [
        BudgetWindow::Daily,
        BudgetWindow::Weekly,
        BudgetWindow::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetWindow::Daily => "daily",
            BudgetWindow::Weekly => "weekly",
            BudgetWindow::Monthly => "monthly",
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        const HOUR: u64 = 60 * 60;
        match self {
            BudgetWindow::Daily => std::time::Duration::from_secs(24 * HOUR),
            BudgetWindow::Weekly => std::time::Duration::from_secs(7 * 24 * HOUR),
            BudgetWindow::Monthly => std::time::Duration::from_secs(30 * 24 * HOUR),
        }
    }
}

impl fmt::Display for BudgetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubConfigError {
    #[error("invalid rule list: {0}")]
    Rules(#[from] RuleParseError),
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI/env > config file > defaults. The merged result is
/// persisted back to the config file so a generated secret key survives
/// restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// base64 of the 32-byte vault key. Always present after bootstrap.
    pub secret_key: Option<String>,
    pub retry_enabled: bool,
    pub retry_max_attempts: u32,
    pub retry_base_sec: f64,
    pub retry_growth: f64,
    pub routing_rules: RoutingRules,
    pub fallback_rules: FallbackRules,
    pub health_probe_period_sec: u64,
    pub health_probe_timeout_sec: u64,
    pub alert_enabled: bool,
    pub alert_consecutive_error_threshold: u32,
    pub alert_latency_multiplier: f64,
    pub alert_budget_threshold_percent: f64,
    pub alert_webhook_url: Option<String>,
    pub alert_desktop_notify: bool,
    pub request_deadline_sec: u64,
}

impl HubConfig {
    pub fn request_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_deadline_sec)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.health_probe_timeout_sec)
    }
}

/// Optional layer used for merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_path: Option<String>,
    pub secret_key: Option<String>,
    pub retry_enabled: Option<bool>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_sec: Option<f64>,
    pub retry_growth: Option<f64>,
    pub routing_rules: Option<String>,
    pub fallback_rules: Option<String>,
    pub health_probe_period_sec: Option<u64>,
    pub health_probe_timeout_sec: Option<u64>,
    pub alert_enabled: Option<bool>,
    pub alert_consecutive_error_threshold: Option<u32>,
    pub alert_latency_multiplier: Option<f64>,
    pub alert_budget_threshold_percent: Option<f64>,
    pub alert_webhook_url: Option<String>,
    pub alert_desktop_notify: Option<bool>,
    pub request_deadline_sec: Option<u64>,
}

impl HubConfigPatch {
    pub fn overlay(&mut self, other: HubConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.database_path.is_some() {
            self.database_path = other.database_path;
        }
        if other.secret_key.is_some() {
            self.secret_key = other.secret_key;
        }
        if other.retry_enabled.is_some() {
            self.retry_enabled = other.retry_enabled;
        }
        if other.retry_max_attempts.is_some() {
            self.retry_max_attempts = other.retry_max_attempts;
        }
        if other.retry_base_sec.is_some() {
            self.retry_base_sec = other.retry_base_sec;
        }
        if other.retry_growth.is_some() {
            self.retry_growth = other.retry_growth;
        }
        if other.routing_rules.is_some() {
            self.routing_rules = other.routing_rules;
        }
        if other.fallback_rules.is_some() {
            self.fallback_rules = other.fallback_rules;
        }
        if other.health_probe_period_sec.is_some() {
            self.health_probe_period_sec = other.health_probe_period_sec;
        }
        if other.health_probe_timeout_sec.is_some() {
            self.health_probe_timeout_sec = other.health_probe_timeout_sec;
        }
        if other.alert_enabled.is_some() {
            self.alert_enabled = other.alert_enabled;
        }
        if other.alert_consecutive_error_threshold.is_some() {
            self.alert_consecutive_error_threshold = other.alert_consecutive_error_threshold;
        }
        if other.alert_latency_multiplier.is_some() {
            self.alert_latency_multiplier = other.alert_latency_multiplier;
        }
        if other.alert_budget_threshold_percent.is_some() {
            self.alert_budget_threshold_percent = other.alert_budget_threshold_percent;
        }
        if other.alert_webhook_url.is_some() {
            self.alert_webhook_url = other.alert_webhook_url;
        }
        if other.alert_desktop_notify.is_some() {
            self.alert_desktop_notify = other.alert_desktop_notify;
        }
        if other.request_deadline_sec.is_some() {
            self.request_deadline_sec = other.request_deadline_sec;
        }
    }

    pub fn into_config(self) -> Result<HubConfig, HubConfigError> {
        let routing_rules = match self.routing_rules.as_deref() {
            Some(raw) => RoutingRules::parse(raw)?,
            None => RoutingRules::default(),
        };
        let fallback_rules = match self.fallback_rules.as_deref() {
            Some(raw) => FallbackRules::parse(raw)?,
            None => FallbackRules::default(),
        };
        Ok(HubConfig {
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(8080),
            database_path: self
                .database_path
                .unwrap_or_else(|| "aihub.db".to_string()),
            secret_key: self.secret_key,
            retry_enabled: self.retry_enabled.unwrap_or(true),
            retry_max_attempts: self.retry_max_attempts.unwrap_or(3).max(1),
            retry_base_sec: self.retry_base_sec.unwrap_or(1.0),
            retry_growth: self.retry_growth.unwrap_or(5.0),
            routing_rules,
            fallback_rules,
            health_probe_period_sec: self.health_probe_period_sec.unwrap_or(30),
            health_probe_timeout_sec: self.health_probe_timeout_sec.unwrap_or(5),
            alert_enabled: self.alert_enabled.unwrap_or(true),
            alert_consecutive_error_threshold: self
                .alert_consecutive_error_threshold
                .unwrap_or(3)
                .max(1),
            alert_latency_multiplier: self.alert_latency_multiplier.unwrap_or(3.0),
            alert_budget_threshold_percent: self.alert_budget_threshold_percent.unwrap_or(90.0),
            alert_webhook_url: self.alert_webhook_url,
            alert_desktop_notify: self.alert_desktop_notify.unwrap_or(false),
            request_deadline_sec: self.request_deadline_sec.unwrap_or(120),
        })
    }

    /// Load a patch from the JSON config file. Missing file is an empty patch.
    pub fn load_file(path: &Path) -> Result<HubConfigPatch, HubConfigError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(HubConfigPatch::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save_file(&self, path: &Path) -> Result<(), HubConfigError> {
        let body = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

impl From<HubConfig> for HubConfigPatch {
    fn from(value: HubConfig) -> Self {
        HubConfigPatch {
            host: Some(value.host),
            port: Some(value.port),
            database_path: Some(value.database_path),
            secret_key: value.secret_key,
            retry_enabled: Some(value.retry_enabled),
            retry_max_attempts: Some(value.retry_max_attempts),
            retry_base_sec: Some(value.retry_base_sec),
            retry_growth: Some(value.retry_growth),
            routing_rules: Some(value.routing_rules.to_rule_string()),
            fallback_rules: Some(value.fallback_rules.to_rule_string()),
            health_probe_period_sec: Some(value.health_probe_period_sec),
            health_probe_timeout_sec: Some(value.health_probe_timeout_sec),
            alert_enabled: Some(value.alert_enabled),
            alert_consecutive_error_threshold: Some(value.alert_consecutive_error_threshold),
            alert_latency_multiplier: Some(value.alert_latency_multiplier),
            alert_budget_threshold_percent: Some(value.alert_budget_threshold_percent),
            alert_webhook_url: value.alert_webhook_url,
            alert_desktop_notify: Some(value.alert_desktop_notify),
            request_deadline_sec: Some(value.request_deadline_sec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_other() {
        let mut base = HubConfigPatch {
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            ..HubConfigPatch::default()
        };
        base.overlay(HubConfigPatch {
            port: Some(9090),
            ..HubConfigPatch::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9090));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = HubConfigPatch::default().into_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.retry_max_attempts, 3);
        assert!((config.retry_base_sec - 1.0).abs() < f64::EPSILON);
        assert!((config.retry_growth - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.health_probe_period_sec, 30);
        assert_eq!(config.request_deadline_sec, 120);
        assert!((config.alert_budget_threshold_percent - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_durations() {
        assert_eq!(
            BudgetWindow::Daily.duration().as_secs(),
            24 * 60 * 60
        );
        assert_eq!(
            BudgetWindow::Monthly.duration().as_secs(),
            30 * 24 * 60 * 60
        );
    }

    #[test]
    fn config_roundtrips_through_patch() {
        let config = HubConfigPatch::default().into_config().unwrap();
        let back = HubConfigPatch::from(config.clone()).into_config().unwrap();
        assert_eq!(config, back);
    }
}
