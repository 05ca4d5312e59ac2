use serde::{Deserialize, Serialize};

/// Adapter-level completion result: what the upstream said, before cost
/// attribution and fallback annotation happen above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCompletion {
    pub content: String,
    /// Model identifier as echoed by the upstream.
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl RawCompletion {
    pub fn total_tokens(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub ok: bool,
    pub latency_ms: i64,
}
