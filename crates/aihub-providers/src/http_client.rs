use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio_util::sync::CancellationToken;

use aihub_provider_core::{AdapterError, AdapterResult, classify_http_status};

const ERROR_BODY_LIMIT: usize = 2048;

/// One shared client per adapter; reqwest pools connections internally.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Send a request, racing it against cancellation, and classify any non-2xx
/// status into the adapter error taxonomy.
pub async fn execute_checked(
    builder: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> AdapterResult<reqwest::Response> {
    let response = tokio::select! {
        result = builder.send() => result.map_err(transport_error)?,
        () = cancel.cancelled() => return Err(AdapterError::Cancelled),
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_http_status(
        status.as_u16(),
        retry_after,
        truncate_body(&body),
    ))
}

pub async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> AdapterResult<T> {
    response.json::<T>().await.map_err(|err| AdapterError::Transient {
        status: None,
        message: format!("malformed upstream response: {err}"),
    })
}

fn transport_error(err: reqwest::Error) -> AdapterError {
    AdapterError::Transient {
        status: err.status().map(|status| status.as_u16()),
        message: err.to_string(),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate_body(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(ERROR_BODY_LIMIT);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= ERROR_BODY_LIMIT);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
