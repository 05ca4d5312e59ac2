use aihub_common::BudgetWindow;
use aihub_storage::StorageError;

/// Pipeline-level error taxonomy. Caught at the HTTP boundary and shaped
/// into the `{detail, code, metadata}` payload.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{0}")]
    BadRequest(String),

    #[error("no enabled connection can serve model {model:?}")]
    ProviderNotConfigured { model: String },

    #[error(
        "{window} budget limit reached (${spent_usd:.2}/${limit_usd:.2}); requests to this connection are blocked until the window rolls over"
    )]
    BudgetExceeded {
        connection_id: i64,
        window: BudgetWindow,
        limit_usd: f64,
        spent_usd: f64,
    },

    /// Upstream chain exhausted. `kind` is the terminal adapter error kind.
    #[error("upstream failure ({kind}) via {provider} after {attempts} attempt(s): {detail}")]
    Upstream {
        kind: &'static str,
        provider: String,
        attempts: u32,
        detail: String,
    },

    #[error("request cancelled")]
    Cancelled {
        /// True when the hub's deadline fired rather than the caller leaving.
        deadline: bool,
    },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable machine-readable code for the error payload and request rows.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::BadRequest(_) => "bad_request",
            HubError::ProviderNotConfigured { .. } => "provider_not_configured",
            HubError::BudgetExceeded { .. } => "budget_exceeded",
            HubError::Upstream { kind, .. } => kind,
            HubError::Cancelled { .. } => "cancelled",
            HubError::Persistence(_) => "persistence",
            HubError::Internal(_) => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            HubError::BadRequest(_) => 400,
            HubError::ProviderNotConfigured { .. } => 503,
            HubError::BudgetExceeded { .. } => 429,
            HubError::Upstream { kind, .. } => match *kind {
                "upstream_rate_limited" => 429,
                _ => 502,
            },
            HubError::Cancelled { deadline } => {
                if *deadline {
                    504
                } else {
                    499
                }
            }
            HubError::Persistence(_) | HubError::Internal(_) => 500,
        }
    }

    /// Structured payload details surfaced alongside the message.
    pub fn metadata(&self) -> Option<serde_json::Value> {
        match self {
            HubError::BudgetExceeded {
                connection_id,
                window,
                limit_usd,
                spent_usd,
            } => Some(serde_json::json!({
                "connection_id": connection_id,
                "window": window.as_str(),
                "limit": limit_usd,
                "spent": spent_usd,
            })),
            HubError::Upstream {
                provider, attempts, ..
            } => Some(serde_json::json!({
                "provider": provider,
                "attempts": attempts,
            })),
            _ => None,
        }
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        HubError::Persistence(err.to_string())
    }
}
