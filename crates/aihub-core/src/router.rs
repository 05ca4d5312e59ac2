//! Pure routing: `(model, connections, rules)` → ordered provider chain.

use std::sync::Arc;

use aihub_common::{FallbackRules, RoutingRules, ServiceKind};
use aihub_provider_core::{AdapterRegistry, AdapterTarget, ChatAdapter};
use aihub_storage::{ConnectionRecord, CostConfigRecord};
use aihub_vault::CredentialVault;

/// Cost rates resolved for a `(connection, model)` pair. `priced` is false
/// when no cost config matched at all (unknown model → cost 0 + warning).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRates {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub priced: bool,
}

impl CostRates {
    pub fn cost_usd(&self, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        (prompt_tokens as f64 * self.input_per_1m + completion_tokens as f64 * self.output_per_1m)
            / 1e6
    }
}

/// One dispatchable element of the provider chain: the adapter, the
/// connection it runs against, decrypted credentials, and the cost rates.
#[derive(Clone)]
pub struct RouteTarget {
    pub connection_id: i64,
    pub connection_name: String,
    pub service: ServiceKind,
    pub adapter: Arc<dyn ChatAdapter>,
    pub target: AdapterTarget,
    pub rates: CostRates,
}

/// Compute the ordered provider chain for a model. First element is the
/// primary, the rest are fallbacks. Stateless and safe to call concurrently.
pub fn route(
    model: &str,
    connections: &[ConnectionRecord],
    cost_configs: &[CostConfigRecord],
    routing: &RoutingRules,
    fallback: &FallbackRules,
    registry: &AdapterRegistry,
    vault: &CredentialVault,
) -> Vec<RouteTarget> {
    let primary_family = routing.resolve(model);

    let mut chain = Vec::new();
    let mut families = vec![primary_family];
    for target_family in fallback.targets_for(primary_family) {
        if !families.contains(&target_family) {
            families.push(target_family);
        }
    }

    for family in families {
        let Some(connection) = best_connection(connections, family) else {
            continue;
        };
        if chain
            .iter()
            .any(|entry: &RouteTarget| entry.connection_id == connection.id)
        {
            continue;
        }
        let Some(adapter) = registry.get(family) else {
            continue;
        };
        let rates = resolve_rates(cost_configs, connection.id, model);
        chain.push(RouteTarget {
            connection_id: connection.id,
            connection_name: connection.name.clone(),
            service: connection.service,
            adapter,
            target: decrypt_target(connection, vault),
            rates,
        });
    }

    chain
}

/// Highest-priority enabled connection for a family: explicit default flag,
/// then most-recently-updated, then lowest id.
pub fn best_connection(
    connections: &[ConnectionRecord],
    family: ServiceKind,
) -> Option<&ConnectionRecord> {
    connections
        .iter()
        .filter(|connection| {
            connection.enabled && connection.service == family && connection.service.is_chat()
        })
        .max_by(|a, b| {
            a.is_default
                .cmp(&b.is_default)
                .then(a.updated_at.cmp(&b.updated_at))
                .then(b.id.cmp(&a.id))
        })
}

/// Resolve cost rates: connection-scoped configs win over legacy/global
/// rows; within a scope, exact model match, then longest trailing-`*`
/// prefix, then the `*` catch-all.
pub fn resolve_rates(
    cost_configs: &[CostConfigRecord],
    connection_id: i64,
    model: &str,
) -> CostRates {
    let scoped = cost_configs
        .iter()
        .filter(|config| config.connection_id == Some(connection_id));
    if let Some(config) = best_pattern_match(scoped, model) {
        return CostRates {
            input_per_1m: config.input_cost_per_1m,
            output_per_1m: config.output_cost_per_1m,
            priced: true,
        };
    }

    let legacy = cost_configs
        .iter()
        .filter(|config| config.connection_id.is_none());
    if let Some(config) = best_pattern_match(legacy, model) {
        return CostRates {
            input_per_1m: config.input_cost_per_1m,
            output_per_1m: config.output_cost_per_1m,
            priced: true,
        };
    }

    CostRates {
        input_per_1m: 0.0,
        output_per_1m: 0.0,
        priced: false,
    }
}

fn best_pattern_match<'a>(
    configs: impl Iterator<Item = &'a CostConfigRecord>,
    model: &str,
) -> Option<&'a CostConfigRecord> {
    let mut catch_all = None;
    let mut best_prefix: Option<&CostConfigRecord> = None;

    for config in configs {
        let pattern = config.model_pattern.as_str();
        if pattern == model {
            return Some(config);
        }
        if pattern == "*" {
            catch_all = Some(config);
            continue;
        }
        if let Some(prefix) = pattern.strip_suffix('*')
            && model.starts_with(prefix)
        {
            let better = best_prefix
                .map(|current| prefix.len() > current.model_pattern.len() - 1)
                .unwrap_or(true);
            if better {
                best_prefix = Some(config);
            }
        }
    }

    best_prefix.or(catch_all)
}

pub(crate) fn decrypt_target(connection: &ConnectionRecord, vault: &CredentialVault) -> AdapterTarget {
    AdapterTarget {
        base_url: connection.base_url.clone(),
        api_key: decrypt_field(vault, connection.api_key_enc.as_deref(), connection.id, "api_key"),
        token: decrypt_field(vault, connection.token_enc.as_deref(), connection.id, "token"),
        default_model: connection.default_model.clone(),
    }
}

fn decrypt_field(
    vault: &CredentialVault,
    ciphertext: Option<&str>,
    connection_id: i64,
    field: &str,
) -> Option<String> {
    let ciphertext = ciphertext?;
    if ciphertext.is_empty() {
        return None;
    }
    match vault.decrypt(ciphertext) {
        Ok(plaintext) if !plaintext.is_empty() => Some(plaintext),
        Ok(_) => None,
        Err(err) => {
            tracing::error!(
                event = "credential_decrypt_failed",
                connection_id,
                field,
                error = %err,
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aihub_providers::register_builtin_adapters;
    use aihub_storage::ConnectionRecord;
    use time::OffsetDateTime;

    fn connection(id: i64, service: ServiceKind, enabled: bool) -> ConnectionRecord {
        let now = OffsetDateTime::now_utc();
        ConnectionRecord {
            id,
            name: format!("conn-{id}"),
            service,
            category: None,
            base_url: None,
            api_key_enc: None,
            token_enc: None,
            credential_file_enc: None,
            default_model: None,
            enabled,
            is_default: false,
            daily_limit_usd: 0.0,
            weekly_limit_usd: 0.0,
            monthly_limit_usd: 0.0,
            budget_override_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn cost_config(
        id: i64,
        connection_id: Option<i64>,
        pattern: &str,
        input: f64,
        output: f64,
    ) -> CostConfigRecord {
        CostConfigRecord {
            id,
            connection_id,
            model_pattern: pattern.to_string(),
            input_cost_per_1m: input,
            output_cost_per_1m: output,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        register_builtin_adapters(&mut registry);
        registry
    }

    fn vault() -> CredentialVault {
        CredentialVault::from_base64_key(&CredentialVault::generate_key()).unwrap()
    }

    #[test]
    fn routes_primary_with_fallback_chain() {
        let connections = vec![
            connection(1, ServiceKind::OpenAi, true),
            connection(2, ServiceKind::Ollama, true),
        ];
        let fallback = FallbackRules::parse("openai:ollama").unwrap();
        let chain = route(
            "gpt-4o",
            &connections,
            &[],
            &RoutingRules::default(),
            &fallback,
            &registry(),
            &vault(),
        );
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].service, ServiceKind::OpenAi);
        assert_eq!(chain[1].service, ServiceKind::Ollama);
    }

    #[test]
    fn disabled_connections_are_invisible() {
        let connections = vec![
            connection(1, ServiceKind::OpenAi, false),
            connection(2, ServiceKind::Ollama, true),
        ];
        let fallback = FallbackRules::parse("openai:ollama").unwrap();
        let chain = route(
            "gpt-4o",
            &connections,
            &[],
            &RoutingRules::default(),
            &fallback,
            &registry(),
            &vault(),
        );
        // Primary family has no enabled connection; only the fallback serves.
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].service, ServiceKind::Ollama);
    }

    #[test]
    fn disabled_fallback_is_skipped() {
        let connections = vec![
            connection(1, ServiceKind::OpenAi, true),
            connection(2, ServiceKind::Ollama, false),
        ];
        let fallback = FallbackRules::parse("openai:ollama").unwrap();
        let chain = route(
            "gpt-4o",
            &connections,
            &[],
            &RoutingRules::default(),
            &fallback,
            &registry(),
            &vault(),
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].service, ServiceKind::OpenAi);
    }

    #[test]
    fn empty_chain_when_nothing_enabled() {
        let chain = route(
            "gpt-4o",
            &[],
            &[],
            &RoutingRules::default(),
            &FallbackRules::default(),
            &registry(),
            &vault(),
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn priority_default_flag_then_recency_then_id() {
        let mut a = connection(1, ServiceKind::OpenAi, true);
        let mut b = connection(2, ServiceKind::OpenAi, true);
        let c = connection(3, ServiceKind::OpenAi, true);

        // b is most recently updated.
        b.updated_at = b.updated_at + time::Duration::minutes(5);
        assert_eq!(
            best_connection(&[a.clone(), b.clone(), c.clone()], ServiceKind::OpenAi)
                .unwrap()
                .id,
            2
        );

        // Explicit default beats recency.
        a.is_default = true;
        assert_eq!(
            best_connection(&[a.clone(), b.clone(), c.clone()], ServiceKind::OpenAi)
                .unwrap()
                .id,
            1
        );

        // Full tie: lowest id wins.
        let tie_a = connection(10, ServiceKind::Ollama, true);
        let mut tie_b = connection(11, ServiceKind::Ollama, true);
        tie_b.updated_at = tie_a.updated_at;
        tie_b.created_at = tie_a.created_at;
        assert_eq!(
            best_connection(&[tie_b, tie_a], ServiceKind::Ollama).unwrap().id,
            10
        );
    }

    #[test]
    fn rates_prefer_exact_then_prefix_then_catch_all() {
        let configs = vec![
            cost_config(1, Some(7), "*", 0.1, 0.2),
            cost_config(2, Some(7), "gpt-4*", 2.5, 10.0),
            cost_config(3, Some(7), "gpt-4o", 5.0, 15.0),
            cost_config(4, None, "gpt-4o", 99.0, 99.0),
        ];
        let exact = resolve_rates(&configs, 7, "gpt-4o");
        assert_eq!(exact.input_per_1m, 5.0);
        assert!(exact.priced);

        let prefix = resolve_rates(&configs, 7, "gpt-4-turbo");
        assert_eq!(prefix.input_per_1m, 2.5);

        let catch_all = resolve_rates(&configs, 7, "o1-mini");
        assert_eq!(catch_all.input_per_1m, 0.1);
    }

    #[test]
    fn legacy_rows_used_when_no_scoped_match() {
        let configs = vec![cost_config(1, None, "claude-3*", 3.0, 15.0)];
        let rates = resolve_rates(&configs, 5, "claude-3-5-sonnet");
        assert!(rates.priced);
        assert_eq!(rates.input_per_1m, 3.0);

        let miss = resolve_rates(&configs, 5, "gpt-4o");
        assert!(!miss.priced);
        assert_eq!(miss.cost_usd(1000, 1000), 0.0);
    }

    #[test]
    fn cost_arithmetic_per_million() {
        let rates = CostRates {
            input_per_1m: 3.0,
            output_per_1m: 15.0,
            priced: true,
        };
        // 1M prompt + 1M completion at 3/15 per million.
        assert!((rates.cost_usd(1_000_000, 1_000_000) - 18.0).abs() < 1e-9);
        assert!((rates.cost_usd(100, 50) - (100.0 * 3.0 + 50.0 * 15.0) / 1e6).abs() < 1e-12);
    }
}
