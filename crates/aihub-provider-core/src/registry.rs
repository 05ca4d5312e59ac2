use std::collections::HashMap;
use std::sync::Arc;

use aihub_common::ServiceKind;

use crate::adapter::ChatAdapter;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ServiceKind, Arc<dyn ChatAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChatAdapter>) {
        self.adapters.insert(adapter.service(), adapter);
    }

    /// Register an adapter under a different service key than its own
    /// (the OpenAI-compatible adapter also serves `custom` connections).
    pub fn register_as(&mut self, service: ServiceKind, adapter: Arc<dyn ChatAdapter>) {
        self.adapters.insert(service, adapter);
    }

    pub fn get(&self, service: ServiceKind) -> Option<Arc<dyn ChatAdapter>> {
        self.adapters.get(&service).cloned()
    }
}
