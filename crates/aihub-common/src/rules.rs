use serde::{Deserialize, Serialize};

use crate::ServiceKind;

#[derive(Debug, thiserror::Error)]
pub enum RuleParseError {
    #[error("invalid rule entry: {0:?} (expected \"key:value\")")]
    Entry(String),
    #[error("unknown service kind: {0:?}")]
    Service(String),
}

/// Model-name prefix → provider family map used by the router.
///
/// Rule strings look like `gpt-:openai,o1-:openai,claude:anthropic`. Anything
/// not matched by a prefix routes to the local family, as does the `local`
/// alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    prefixes: Vec<(String, ServiceKind)>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        RoutingRules {
            prefixes: vec![
                ("gpt-".to_string(), ServiceKind::OpenAi),
                ("o1-".to_string(), ServiceKind::OpenAi),
                ("claude".to_string(), ServiceKind::Anthropic),
            ],
        }
    }
}

impl RoutingRules {
    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        let mut prefixes = Vec::new();
        for entry in split_entries(raw) {
            let (prefix, service) = split_pair(entry)?;
            let service =
                ServiceKind::parse(service).ok_or_else(|| RuleParseError::Service(service.to_string()))?;
            prefixes.push((prefix.to_string(), service));
        }
        Ok(RoutingRules { prefixes })
    }

    /// Resolve a model name to its provider family. Longest prefix wins.
    pub fn resolve(&self, model: &str) -> ServiceKind {
        let model = model.to_ascii_lowercase();
        if model == "local" {
            return ServiceKind::Ollama;
        }
        self.prefixes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, service)| *service)
            .unwrap_or(ServiceKind::Ollama)
    }

    pub fn to_rule_string(&self) -> String {
        self.prefixes
            .iter()
            .map(|(prefix, service)| format!("{prefix}:{service}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `src:dst` fallback pairs consulted when a primary family is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRules {
    pairs: Vec<(ServiceKind, ServiceKind)>,
}

impl FallbackRules {
    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        let mut pairs = Vec::new();
        for entry in split_entries(raw) {
            let (src, dst) = split_pair(entry)?;
            let src =
                ServiceKind::parse(src).ok_or_else(|| RuleParseError::Service(src.to_string()))?;
            let dst =
                ServiceKind::parse(dst).ok_or_else(|| RuleParseError::Service(dst.to_string()))?;
            pairs.push((src, dst));
        }
        Ok(FallbackRules { pairs })
    }

    /// Fallback families for a primary family, in rule order.
    pub fn targets_for(&self, src: ServiceKind) -> Vec<ServiceKind> {
        self.pairs
            .iter()
            .filter(|(rule_src, _)| *rule_src == src)
            .map(|(_, dst)| *dst)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_rule_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(src, dst)| format!("{src}:{dst}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn split_entries(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn split_pair(entry: &str) -> Result<(&str, &str), RuleParseError> {
    let Some((left, right)) = entry.split_once(':') else {
        return Err(RuleParseError::Entry(entry.to_string()));
    };
    let left = left.trim();
    let right = right.trim();
    if left.is_empty() || right.is_empty() {
        return Err(RuleParseError::Entry(entry.to_string()));
    }
    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routing_covers_known_prefixes() {
        let rules = RoutingRules::default();
        assert_eq!(rules.resolve("gpt-4o"), ServiceKind::OpenAi);
        assert_eq!(rules.resolve("o1-preview"), ServiceKind::OpenAi);
        assert_eq!(rules.resolve("claude-3-5-haiku"), ServiceKind::Anthropic);
        assert_eq!(rules.resolve("qwen2.5:32b"), ServiceKind::Ollama);
        assert_eq!(rules.resolve("local"), ServiceKind::Ollama);
    }

    #[test]
    fn custom_routing_overrides_defaults() {
        let rules = RoutingRules::parse("mistral:custom,gpt-:openai").unwrap();
        assert_eq!(rules.resolve("mistral-large"), ServiceKind::Custom);
        assert_eq!(rules.resolve("gpt-4"), ServiceKind::OpenAi);
        // No claude prefix in the custom rule set: routes local.
        assert_eq!(rules.resolve("claude-3-opus"), ServiceKind::Ollama);
    }

    #[test]
    fn longest_prefix_wins() {
        let rules = RoutingRules::parse("gpt-:openai,gpt-4-turbo:custom").unwrap();
        assert_eq!(rules.resolve("gpt-4-turbo"), ServiceKind::Custom);
        assert_eq!(rules.resolve("gpt-4o"), ServiceKind::OpenAi);
    }

    #[test]
    fn fallback_pairs_parse_and_lookup() {
        let rules = FallbackRules::parse("openai:ollama, anthropic:ollama").unwrap();
        assert_eq!(
            rules.targets_for(ServiceKind::OpenAi),
            vec![ServiceKind::Ollama]
        );
        assert!(rules.targets_for(ServiceKind::Ollama).is_empty());
    }

    #[test]
    fn malformed_rules_rejected() {
        assert!(RoutingRules::parse("gpt-").is_err());
        assert!(FallbackRules::parse("openai:nonsense").is_err());
    }

    #[test]
    fn rule_string_roundtrip() {
        let rules = FallbackRules::parse("openai:ollama,anthropic:ollama").unwrap();
        let back = FallbackRules::parse(&rules.to_rule_string()).unwrap();
        assert_eq!(rules, back);
    }
}
