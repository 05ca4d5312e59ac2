use std::sync::Arc;

use aihub_core::alerts::{AlertHub, AlertKind, AlertManager};
use aihub_storage::{SeaOrmStorage, Storage};

async fn manager() -> (AlertManager, Arc<SeaOrmStorage>) {
    let storage = Arc::new(SeaOrmStorage::connect("sqlite::memory:").await.unwrap());
    storage.sync().await.unwrap();
    let storage_dyn: Arc<dyn Storage> = storage.clone();
    (AlertManager::new(storage_dyn, AlertHub::new()), storage)
}

#[tokio::test]
async fn raise_creates_single_active_alert_per_key() {
    let (manager, storage) = manager().await;

    let first = manager
        .raise(
            1,
            "OpenAI",
            AlertKind::ConsecutiveErrors,
            "3 consecutive failures".to_string(),
            None,
        )
        .await
        .unwrap();
    assert!(first.is_some());

    // Same key again: deduplicated.
    let second = manager
        .raise(
            1,
            "OpenAI",
            AlertKind::ConsecutiveErrors,
            "still failing".to_string(),
            None,
        )
        .await
        .unwrap();
    assert!(second.is_none());

    let active = storage.alert_list(true, 10).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kind, "consecutive-errors");
    assert_eq!(active[0].severity, "error");
}

#[tokio::test]
async fn clear_resolves_within_one_cycle() {
    let (manager, storage) = manager().await;

    manager
        .raise(
            7,
            "Ollama",
            AlertKind::LatencySpike,
            "latency 3x baseline".to_string(),
            None,
        )
        .await
        .unwrap()
        .unwrap();

    // Condition no longer holds: the next check clears it.
    let resolved = manager.clear(7, AlertKind::LatencySpike).await.unwrap();
    assert_eq!(resolved, 1);

    assert!(storage.alert_list(true, 10).await.unwrap().is_empty());
    let all = storage.alert_list(false, 10).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].resolved_at.is_some());

    // Clearing an already-clear key is a no-op.
    assert_eq!(manager.clear(7, AlertKind::LatencySpike).await.unwrap(), 0);
}

#[tokio::test]
async fn raise_publishes_to_hub_subscribers() {
    let (manager, _storage) = manager().await;
    let mut rx = manager.hub().subscribe();

    manager
        .raise(
            2,
            "Anthropic",
            AlertKind::BudgetThreshold,
            "daily budget at 92%".to_string(),
            Some(serde_json::json!({ "percent": 92.0 })),
        )
        .await
        .unwrap()
        .unwrap();

    let payload = rx.recv().await.unwrap();
    assert_eq!(payload.connection_id, 2);
    assert_eq!(payload.connection_name, "Anthropic");
    assert_eq!(payload.kind, "budget-threshold");
    assert_eq!(payload.severity, "warning");
    assert_eq!(payload.metadata.unwrap()["percent"], 92.0);
}

#[tokio::test]
async fn different_connections_do_not_dedup_each_other() {
    let (manager, storage) = manager().await;

    manager
        .raise(1, "A", AlertKind::ConsecutiveErrors, "a".to_string(), None)
        .await
        .unwrap()
        .unwrap();
    manager
        .raise(2, "B", AlertKind::ConsecutiveErrors, "b".to_string(), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(storage.alert_list(true, 10).await.unwrap().len(), 2);
}
