use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use aihub_common::HubConfig;
use aihub_storage::{ConnectionRecord, CostConfigRecord, Storage, StorageResult};
use aihub_vault::CredentialVault;

use crate::health::HealthTracker;

/// Composition root state. Hot-path reads (routing, rate lookup) come from
/// the ArcSwap snapshots; admin mutations write storage first and then
/// refresh the snapshot.
pub struct AppState {
    pub config: ArcSwap<HubConfig>,
    pub vault: CredentialVault,
    pub health: HealthTracker,
    connections: ArcSwap<Vec<ConnectionRecord>>,
    cost_configs: ArcSwap<Vec<CostConfigRecord>>,
    unpriced_models: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn new(
        config: HubConfig,
        vault: CredentialVault,
        connections: Vec<ConnectionRecord>,
        cost_configs: Vec<CostConfigRecord>,
    ) -> Self {
        let health = HealthTracker::new(config.alert_consecutive_error_threshold);
        AppState {
            config: ArcSwap::from_pointee(config),
            vault,
            health,
            connections: ArcSwap::from_pointee(connections),
            cost_configs: ArcSwap::from_pointee(cost_configs),
            unpriced_models: Mutex::new(HashSet::new()),
        }
    }

    pub fn connections(&self) -> Arc<Vec<ConnectionRecord>> {
        self.connections.load_full()
    }

    pub fn cost_configs(&self) -> Arc<Vec<CostConfigRecord>> {
        self.cost_configs.load_full()
    }

    /// Re-read connections and cost configs after an admin mutation.
    pub async fn reload(&self, storage: &dyn Storage) -> StorageResult<()> {
        let connections = storage.list_connections().await?;
        let cost_configs = storage.list_cost_configs(None).await?;
        self.connections.store(Arc::new(connections));
        self.cost_configs.store(Arc::new(cost_configs));
        Ok(())
    }

    /// True exactly once per model name; callers use it to warn a single
    /// time when a cloud model has no cost config.
    pub fn first_unpriced_sighting(&self, model: &str) -> bool {
        let mut seen = self
            .unpriced_models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        seen.insert(model.to_string())
    }
}
