//! Concrete provider adapters and their registration.

use std::sync::Arc;
use std::time::Duration;

use aihub_common::ServiceKind;
use aihub_provider_core::AdapterRegistry;

mod anthropic;
mod http_client;
mod local;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use local::LocalAdapter;
pub use openai::OpenAiAdapter;

/// Upstream call budget; per-request deadlines are tighter and enforced by
/// the executor's cancellation token.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Register one adapter per chat-capable service key. `custom` connections
/// share the OpenAI-compatible wire protocol.
pub fn register_builtin_adapters(registry: &mut AdapterRegistry) {
    let client = http_client::build_client(UPSTREAM_TIMEOUT);
    registry.register(Arc::new(OpenAiAdapter::new(client.clone())));
    registry.register(Arc::new(AnthropicAdapter::new(client.clone())));
    registry.register(Arc::new(LocalAdapter::new(client.clone())));
    registry.register_as(
        ServiceKind::Custom,
        Arc::new(OpenAiAdapter::for_custom(client)),
    );
}
