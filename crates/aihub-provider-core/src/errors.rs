use std::time::Duration;

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure classes an upstream call can land in. The executor's retry and
/// fallback decisions key entirely off the variant, never the message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// 401/403: credentials rejected. Never retried; the executor moves to
    /// the next provider in the chain.
    #[error("auth rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    /// 400/404/422: the upstream will never accept this request as-is.
    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    /// 429. `retry_after` carries a parsed Retry-After when the upstream
    /// sent one; the executor honours it when it exceeds the backoff.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// 5xx, timeouts, connection failures. Retried with backoff.
    #[error("transient upstream failure: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Caller cancelled or the deadline elapsed mid-call.
    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Transient { .. }
        )
    }

    /// Whether the executor should abandon this provider and try the next
    /// one without further attempts.
    pub fn skips_provider(&self) -> bool {
        matches!(
            self,
            AdapterError::Auth { .. } | AdapterError::BadRequest { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdapterError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable kind string for logs and persisted error columns.
    pub fn kind_str(&self) -> &'static str {
        match self {
            AdapterError::Auth { .. } => "auth",
            AdapterError::BadRequest { .. } => "bad_request",
            AdapterError::RateLimited { .. } => "upstream_rate_limited",
            AdapterError::Transient { .. } => "upstream_transient",
            AdapterError::Cancelled => "cancelled",
        }
    }
}

/// Map an upstream HTTP status into the taxonomy. `retry_after` is the
/// parsed Retry-After header, if any.
pub fn classify_http_status(
    status: u16,
    retry_after: Option<Duration>,
    message: String,
) -> AdapterError {
    match status {
        401 | 403 => AdapterError::Auth { status, message },
        400 | 404 | 422 => AdapterError::BadRequest { status, message },
        429 => AdapterError::RateLimited {
            retry_after,
            message,
        },
        _ => AdapterError::Transient {
            status: Some(status),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_http_status(401, None, String::new()),
            AdapterError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify_http_status(403, None, String::new()),
            AdapterError::Auth { .. }
        ));
        assert!(matches!(
            classify_http_status(422, None, String::new()),
            AdapterError::BadRequest { .. }
        ));
        assert!(matches!(
            classify_http_status(429, None, String::new()),
            AdapterError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_http_status(500, None, String::new()),
            AdapterError::Transient {
                status: Some(500),
                ..
            }
        ));
    }

    #[test]
    fn retry_and_skip_dispositions() {
        let auth = classify_http_status(401, None, String::new());
        assert!(!auth.is_retryable());
        assert!(auth.skips_provider());

        let rate = classify_http_status(429, Some(Duration::from_secs(30)), String::new());
        assert!(rate.is_retryable());
        assert!(!rate.skips_provider());
        assert_eq!(rate.retry_after(), Some(Duration::from_secs(30)));

        let transient = classify_http_status(503, None, String::new());
        assert!(transient.is_retryable());
        assert!(!transient.skips_provider());

        assert!(!AdapterError::Cancelled.is_retryable());
        assert!(!AdapterError::Cancelled.skips_provider());
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            classify_http_status(400, None, String::new()).kind_str(),
            "bad_request"
        );
        assert_eq!(
            classify_http_status(429, None, String::new()).kind_str(),
            "upstream_rate_limited"
        );
        assert_eq!(AdapterError::Cancelled.kind_str(), "cancelled");
    }
}
