use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aihub_common::{HubConfigPatch, ServiceKind};
use aihub_providers::register_builtin_adapters;
use aihub_provider_core::AdapterRegistry;
use aihub_storage::{NewConnection, SeaOrmStorage, Storage};
use aihub_vault::CredentialVault;

use crate::alerts::{AlertHub, AlertManager, DesktopChannel, WebhookChannel};
use crate::monitor::{MonitorDeps, spawn_monitors};
use crate::pipeline::Pipeline;
use crate::state::AppState;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "aihub",
    version,
    about = "Localhost AI gateway: one OpenAI-compatible door to many providers"
)]
pub struct CliArgs {
    /// Config file holding persisted settings and the credential key.
    #[arg(long, env = "HUB_CONFIG_PATH", default_value = "hub-config.json")]
    pub config_path: String,

    #[arg(long, env = "HUB_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "HUB_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Credential encryption key (base64, 32 bytes). Generated if absent.
    #[arg(long, env = "HUB_SECRET_KEY")]
    pub secret_key: Option<String>,

    #[arg(long, env = "RETRY_ENABLED")]
    pub retry_enabled: Option<bool>,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<u32>,

    #[arg(long, env = "RETRY_BASE_SEC")]
    pub retry_base_sec: Option<f64>,

    #[arg(long, env = "RETRY_GROWTH")]
    pub retry_growth: Option<f64>,

    /// Comma-separated `prefix:family` pairs overriding the routing map.
    #[arg(long, env = "ROUTING_RULES")]
    pub routing_rules: Option<String>,

    /// Comma-separated `src:dst` fallback pairs.
    #[arg(long, env = "FALLBACK_RULES")]
    pub fallback_rules: Option<String>,

    #[arg(long, env = "HEALTH_PROBE_PERIOD_SEC")]
    pub health_probe_period_sec: Option<u64>,

    #[arg(long, env = "HEALTH_PROBE_TIMEOUT_SEC")]
    pub health_probe_timeout_sec: Option<u64>,

    #[arg(long, env = "ALERT_ENABLED")]
    pub alert_enabled: Option<bool>,

    #[arg(long, env = "ALERT_CONSECUTIVE_ERROR_THRESHOLD")]
    pub alert_consecutive_error_threshold: Option<u32>,

    #[arg(long, env = "ALERT_LATENCY_MULTIPLIER")]
    pub alert_latency_multiplier: Option<f64>,

    #[arg(long, env = "ALERT_BUDGET_THRESHOLD_PERCENT")]
    pub alert_budget_threshold_percent: Option<f64>,

    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,

    #[arg(long, env = "ALERT_DESKTOP_NOTIFY")]
    pub alert_desktop_notify: Option<bool>,

    #[arg(long, env = "HUB_REQUEST_DEADLINE_SEC")]
    pub request_deadline_sec: Option<u64>,

    /// Conventional provider env vars, imported as connections on first run.
    #[arg(long, env = "OPENAI_API_KEY", hide = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "OLLAMA_URL", hide = true)]
    pub ollama_url: Option<String>,
}

impl CliArgs {
    fn to_patch(&self) -> HubConfigPatch {
        HubConfigPatch {
            host: self.host.clone(),
            port: self.port,
            database_path: self.database_path.clone(),
            secret_key: self.secret_key.clone(),
            retry_enabled: self.retry_enabled,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_sec: self.retry_base_sec,
            retry_growth: self.retry_growth,
            routing_rules: self.routing_rules.clone(),
            fallback_rules: self.fallback_rules.clone(),
            health_probe_period_sec: self.health_probe_period_sec,
            health_probe_timeout_sec: self.health_probe_timeout_sec,
            alert_enabled: self.alert_enabled,
            alert_consecutive_error_threshold: self.alert_consecutive_error_threshold,
            alert_latency_multiplier: self.alert_latency_multiplier,
            alert_budget_threshold_percent: self.alert_budget_threshold_percent,
            alert_webhook_url: self.alert_webhook_url.clone(),
            alert_desktop_notify: self.alert_desktop_notify,
            request_deadline_sec: self.request_deadline_sec,
        }
    }
}

pub struct Bootstrap {
    pub state: Arc<AppState>,
    pub storage: Arc<SeaOrmStorage>,
    pub registry: Arc<AdapterRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub alerts: Arc<AlertManager>,
    pub shutdown: CancellationToken,
    pub monitor_handles: Vec<JoinHandle<()>>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    // 1) Merge config: CLI/env > config file > defaults.
    let config_path = PathBuf::from(&args.config_path);
    let mut merged = HubConfigPatch::load_file(&config_path).context("load config file")?;
    merged.overlay(args.to_patch());

    // 2) Materialise the credential key once per install.
    if merged.secret_key.is_none() {
        merged.secret_key = Some(CredentialVault::generate_key());
        tracing::warn!(
            event = "secret_key_generated",
            config_path = %config_path.display(),
            "generated a credential encryption key; it is stored in the config file, keep that file safe"
        );
    }

    let config = merged.into_config().context("finalize merged config")?;
    let secret_key = config
        .secret_key
        .clone()
        .context("secret key missing after materialisation")?;

    // 3) Persist the merged result so the key and settings survive restarts.
    HubConfigPatch::from(config.clone())
        .save_file(&config_path)
        .context("persist config file")?;

    let vault = CredentialVault::from_base64_key(&secret_key).context("construct vault")?;

    // 4) Storage: connect + idempotent schema sync.
    let storage = Arc::new(
        SeaOrmStorage::connect_file(&config.database_path)
            .await
            .context("connect storage")?,
    );
    storage.sync().await.context("schema sync")?;
    let storage_dyn: Arc<dyn Storage> = storage.clone();

    // 5) One-way env import: database stays authoritative afterwards.
    seed_env_connections(&args, storage_dyn.as_ref(), &vault)
        .await
        .context("seed connections from environment")?;

    // 6) Budget singleton exists after first read.
    storage_dyn
        .get_budget_limits()
        .await
        .context("ensure budget limits")?;

    // 7) In-memory snapshots; all hot-path reads come from here.
    let connections = storage_dyn
        .list_connections()
        .await
        .context("load connections")?;
    let cost_configs = storage_dyn
        .list_cost_configs(None)
        .await
        .context("load cost configs")?;
    let state = Arc::new(AppState::new(
        config.clone(),
        vault,
        connections,
        cost_configs,
    ));

    let registry = Arc::new({
        let mut registry = AdapterRegistry::new();
        register_builtin_adapters(&mut registry);
        registry
    });

    // 8) Alert dispatch channels, bound to process shutdown.
    let shutdown = CancellationToken::new();
    let hub = AlertHub::new();
    if let Some(url) = &config.alert_webhook_url {
        hub.attach_channel(Arc::new(WebhookChannel::new(url.clone())), shutdown.clone());
    }
    if config.alert_desktop_notify {
        hub.attach_channel(Arc::new(DesktopChannel), shutdown.clone());
    }
    let alerts = Arc::new(AlertManager::new(storage_dyn.clone(), hub));

    let pipeline = Arc::new(Pipeline::new(
        state.clone(),
        storage_dyn.clone(),
        registry.clone(),
    ));

    // 9) Background loops; shutdown cancels, the binary joins.
    let monitor_handles = spawn_monitors(
        MonitorDeps {
            state: state.clone(),
            storage: storage_dyn,
            registry: registry.clone(),
            alerts: alerts.clone(),
        },
        shutdown.clone(),
    );

    tracing::info!(
        event = "hub_bootstrapped",
        host = %config.host,
        port = config.port,
        database = %config.database_path,
        connections = state.connections().len(),
    );

    Ok(Bootstrap {
        state,
        storage,
        registry,
        pipeline,
        alerts,
        shutdown,
        monitor_handles,
    })
}

async fn seed_env_connections(
    args: &CliArgs,
    storage: &dyn Storage,
    vault: &CredentialVault,
) -> anyhow::Result<()> {
    let existing = storage.list_connections().await?;
    let has_service = |service: ServiceKind| {
        existing
            .iter()
            .any(|connection| connection.service == service)
    };

    if let Some(key) = args.openai_api_key.as_deref()
        && !has_service(ServiceKind::OpenAi)
    {
        storage
            .insert_connection(&env_connection(
                "OpenAI",
                ServiceKind::OpenAi,
                None,
                Some(vault.encrypt(key).context("encrypt OPENAI_API_KEY")?),
            ))
            .await?;
        tracing::info!(event = "connection_imported", service = "openai");
    }

    if let Some(key) = args.anthropic_api_key.as_deref()
        && !has_service(ServiceKind::Anthropic)
    {
        storage
            .insert_connection(&env_connection(
                "Anthropic",
                ServiceKind::Anthropic,
                None,
                Some(vault.encrypt(key).context("encrypt ANTHROPIC_API_KEY")?),
            ))
            .await?;
        tracing::info!(event = "connection_imported", service = "anthropic");
    }

    // The local connection always exists: it needs no key and serves as the
    // default fallback family.
    if !has_service(ServiceKind::Ollama) {
        storage
            .insert_connection(&env_connection(
                "Ollama",
                ServiceKind::Ollama,
                args.ollama_url.clone(),
                None,
            ))
            .await?;
        tracing::info!(event = "connection_imported", service = "ollama");
    }

    Ok(())
}

fn env_connection(
    name: &str,
    service: ServiceKind,
    base_url: Option<String>,
    api_key_enc: Option<String>,
) -> NewConnection {
    NewConnection {
        name: name.to_string(),
        service,
        category: Some("llm".to_string()),
        base_url,
        api_key_enc,
        token_enc: None,
        credential_file_enc: None,
        default_model: None,
        enabled: true,
        is_default: false,
        daily_limit_usd: 0.0,
        weekly_limit_usd: 0.0,
        monthly_limit_usd: 0.0,
    }
}
