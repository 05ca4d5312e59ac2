use std::time::Duration;

use time::OffsetDateTime;

use aihub_common::{BudgetWindow, ServiceKind};
use aihub_storage::{
    ConnectionUpdate, NewAlert, NewApiCall, NewConnection, NewRequest, SeaOrmStorage, Storage,
};

async fn memory_storage() -> SeaOrmStorage {
    let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
    storage.sync().await.unwrap();
    storage
}

fn sample_connection(name: &str, service: ServiceKind) -> NewConnection {
    NewConnection {
        name: name.to_string(),
        service,
        category: Some("llm".to_string()),
        base_url: None,
        api_key_enc: Some("opaque".to_string()),
        token_enc: None,
        credential_file_enc: None,
        default_model: None,
        enabled: true,
        is_default: false,
        daily_limit_usd: 1.0,
        weekly_limit_usd: 5.0,
        monthly_limit_usd: 20.0,
    }
}

fn sample_request(provider: &str, success: bool, cost: f64) -> NewRequest {
    NewRequest {
        model: "gpt-4o".to_string(),
        provider: provider.to_string(),
        prompt_tokens: 100,
        completion_tokens: 50,
        cost_usd: cost,
        latency_ms: 200,
        success,
        error: if success {
            None
        } else {
            Some("upstream_transient".to_string())
        },
        workflow: None,
    }
}

#[tokio::test]
async fn sync_is_idempotent() {
    let storage = memory_storage().await;
    let created = storage
        .insert_connection(&sample_connection("openai", ServiceKind::OpenAi))
        .await
        .unwrap();

    // Running the bootstrap again must not lose rows or fail on existing
    // tables/indexes.
    storage.sync().await.unwrap();
    storage.sync().await.unwrap();

    let listed = storage.list_connections().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
}

#[tokio::test]
async fn insert_connection_seeds_catch_all_cost_config() {
    let storage = memory_storage().await;
    let created = storage
        .insert_connection(&sample_connection("ollama", ServiceKind::Ollama))
        .await
        .unwrap();

    let configs = storage.list_cost_configs(Some(created.id)).await.unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].model_pattern, "*");
    assert_eq!(configs[0].input_cost_per_1m, 0.0);
    assert_eq!(configs[0].output_cost_per_1m, 0.0);
}

#[tokio::test]
async fn delete_connection_cascades_to_cost_configs() {
    let storage = memory_storage().await;
    let created = storage
        .insert_connection(&sample_connection("openai", ServiceKind::OpenAi))
        .await
        .unwrap();
    assert!(!storage.list_cost_configs(Some(created.id)).await.unwrap().is_empty());

    assert!(storage.delete_connection(created.id).await.unwrap());
    assert!(storage.list_cost_configs(Some(created.id)).await.unwrap().is_empty());
    assert!(storage.get_connection(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn toggle_roundtrip_preserves_row() {
    let storage = memory_storage().await;
    let created = storage
        .insert_connection(&sample_connection("openai", ServiceKind::OpenAi))
        .await
        .unwrap();

    let disabled = storage
        .set_connection_enabled(created.id, false)
        .await
        .unwrap()
        .unwrap();
    assert!(!disabled.enabled);

    let restored = storage
        .set_connection_enabled(created.id, true)
        .await
        .unwrap()
        .unwrap();
    assert!(restored.enabled);
    assert_eq!(restored.name, created.name);
    assert_eq!(restored.service, created.service);
    assert_eq!(restored.daily_limit_usd, created.daily_limit_usd);
    assert_eq!(restored.created_at, created.created_at);
}

#[tokio::test]
async fn update_connection_keeps_unpatched_credentials() {
    let storage = memory_storage().await;
    let created = storage
        .insert_connection(&sample_connection("openai", ServiceKind::OpenAi))
        .await
        .unwrap();

    let updated = storage
        .update_connection(
            created.id,
            &ConnectionUpdate {
                name: Some("renamed".to_string()),
                daily_limit_usd: Some(9.0),
                ..ConnectionUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.daily_limit_usd, 9.0);
    assert_eq!(updated.api_key_enc.as_deref(), Some("opaque"));
}

#[tokio::test]
async fn budget_limits_autocreate_with_defaults() {
    let storage = memory_storage().await;
    let limits = storage.get_budget_limits().await.unwrap();
    assert_eq!(limits.daily_limit_usd, 5.0);
    assert_eq!(limits.weekly_limit_usd, 25.0);
    assert_eq!(limits.monthly_limit_usd, 80.0);

    let mut updated = limits;
    updated.daily_limit_usd = 2.5;
    storage.put_budget_limits(&updated).await.unwrap();
    assert_eq!(storage.get_budget_limits().await.unwrap().daily_limit_usd, 2.5);
}

#[tokio::test]
async fn aggregate_spend_sums_requests_and_api_calls() {
    let storage = memory_storage().await;
    storage
        .insert_request(&sample_request("openai", true, 0.40))
        .await
        .unwrap();
    storage
        .insert_request(&sample_request("openai", false, 0.10))
        .await
        .unwrap();
    storage
        .insert_request(&sample_request("anthropic", true, 5.00))
        .await
        .unwrap();
    storage
        .insert_api_call(&NewApiCall {
            service: "openai".to_string(),
            operation: "list_models".to_string(),
            endpoint: "/v1/models".to_string(),
            method: "GET".to_string(),
            status_code: Some(200),
            latency_ms: 50,
            cost_usd: 0.05,
            metadata: None,
            success: true,
            error: None,
        })
        .await
        .unwrap();

    let spent = storage
        .aggregate_spend("openai", BudgetWindow::Daily)
        .await
        .unwrap();
    assert!((spent - 0.55).abs() < 1e-9);

    let other = storage
        .aggregate_spend("ollama", BudgetWindow::Monthly)
        .await
        .unwrap();
    assert_eq!(other, 0.0);
}

#[tokio::test]
async fn recent_outcomes_and_latencies_are_newest_first() {
    let storage = memory_storage().await;
    storage
        .insert_request(&sample_request("openai", true, 0.0))
        .await
        .unwrap();
    storage
        .insert_request(&sample_request("openai", false, 0.0))
        .await
        .unwrap();
    storage
        .insert_request(&sample_request("openai", false, 0.0))
        .await
        .unwrap();

    let since = OffsetDateTime::now_utc() - time::Duration::minutes(10);
    let outcomes = storage.recent_outcomes("openai", 3, since).await.unwrap();
    assert_eq!(outcomes, vec![false, false, true]);

    let latencies = storage.recent_latencies("openai", 10).await.unwrap();
    assert_eq!(latencies, vec![200]);
}

#[tokio::test]
async fn alert_dedup_blocks_second_active() {
    let storage = memory_storage().await;
    let candidate = NewAlert {
        connection_id: 7,
        kind: "consecutive-errors".to_string(),
        severity: "error".to_string(),
        message: "3 consecutive failures".to_string(),
        metadata: None,
    };
    let window = Duration::from_secs(15 * 60);

    let first = storage
        .alert_upsert_active(&candidate, window)
        .await
        .unwrap();
    assert!(first.is_some());

    let second = storage
        .alert_upsert_active(&candidate, window)
        .await
        .unwrap();
    assert!(second.is_none());

    // A different kind for the same connection is a distinct dedup key.
    let other_kind = NewAlert {
        kind: "latency-spike".to_string(),
        severity: "warning".to_string(),
        ..candidate.clone()
    };
    assert!(
        storage
            .alert_upsert_active(&other_kind, window)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn alert_resolve_clears_active_but_dedup_window_still_suppresses() {
    let storage = memory_storage().await;
    let candidate = NewAlert {
        connection_id: 1,
        kind: "budget-threshold".to_string(),
        severity: "warning".to_string(),
        message: "90% of daily budget".to_string(),
        metadata: None,
    };
    let window = Duration::from_secs(15 * 60);

    storage
        .alert_upsert_active(&candidate, window)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(storage.alert_resolve(1, "budget-threshold").await.unwrap(), 1);
    assert!(storage.alert_list(true, 10).await.unwrap().is_empty());

    // Resolved moments ago: still inside the 15-minute suppression window.
    assert!(
        storage
            .alert_upsert_active(&candidate, window)
            .await
            .unwrap()
            .is_none()
    );

    // With no dedup window the condition may re-raise immediately.
    assert!(
        storage
            .alert_upsert_active(&candidate, Duration::ZERO)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn alert_dismiss_is_terminal_for_listing() {
    let storage = memory_storage().await;
    let created = storage
        .alert_upsert_active(
            &NewAlert {
                connection_id: 2,
                kind: "latency-spike".to_string(),
                severity: "warning".to_string(),
                message: "latency 3x baseline".to_string(),
                metadata: None,
            },
            Duration::from_secs(900),
        )
        .await
        .unwrap()
        .unwrap();

    assert!(storage.alert_dismiss(created.id).await.unwrap());
    assert!(storage.alert_list(true, 10).await.unwrap().is_empty());
    let all = storage.alert_list(false, 10).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].dismissed_at.is_some());

    assert!(!storage.alert_dismiss(9999).await.unwrap());
}

#[tokio::test]
async fn recent_requests_honours_limit() {
    let storage = memory_storage().await;
    for _ in 0..5 {
        storage
            .insert_request(&sample_request("ollama", true, 0.0))
            .await
            .unwrap();
    }
    let rows = storage.recent_requests(3).await.unwrap();
    assert_eq!(rows.len(), 3);
}
