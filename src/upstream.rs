//! Single upstream call: fetch, decode, classify.

use crate::normalize::Standardized;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Characters of an undecodable body echoed back in the synthetic payload.
const RAW_TEXT_PREVIEW_CHARS: usize = 200;

const USER_AGENT: &str = concat!("ip-intel/", env!("CARGO_PKG_VERSION"));

/// Response returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Error from a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed.
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    /// The call did not finish before its deadline.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// HTTP GET access to upstream APIs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` and return the status code and the full body as text.
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose client enforces `timeout` per request.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RawResponse { status, body })
    }
}

/// Result of querying one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchOutcome {
    /// Parsed upstream payload.
    #[serde(rename = "data")]
    pub raw_data: Option<Value>,

    /// Wall time spent on the call.
    #[serde(rename = "elapsed")]
    pub elapsed_ms: u64,

    /// HTTP status, 0 if no response was received.
    #[serde(rename = "status")]
    pub http_status: u16,

    /// Human-readable failure, if any.
    #[serde(rename = "error")]
    pub error_message: Option<String>,

    /// Common-schema fields, present only after a successful transform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standardized: Option<Standardized>,
}

impl FetchOutcome {
    /// Outcome carrying only an error message and status 0, used when no
    /// upstream call was made or its task died.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// True if the call produced data and no error.
    pub fn is_success(&self) -> bool {
        self.raw_data.is_some() && self.error_message.is_none()
    }
}

/// Fetch `url` with a hard deadline covering connect, headers and body.
///
/// Never fails: transport errors, timeouts, error statuses and undecodable
/// bodies are all reported inside the returned outcome.
pub async fn fetch_one(transport: &dyn Transport, url: &str, timeout: Duration) -> FetchOutcome {
    let start = Instant::now();

    // Dropping the transport future on expiry aborts the in-flight request.
    let result = match tokio::time::timeout(timeout, transport.get(url)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    };

    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(response) => {
            let data = decode_body(&response.body);
            let error_message = classify_status(response.status).map(str::to_string);

            match error_message {
                Some(ref code) => warn!(
                    url = %url,
                    status = response.status,
                    code = %code,
                    "Upstream returned error status"
                ),
                None => debug!(url = %url, status = response.status, elapsed_ms, "Upstream call complete"),
            }

            FetchOutcome {
                raw_data: Some(data),
                elapsed_ms,
                http_status: response.status,
                error_message,
                standardized: None,
            }
        }
        Err(e) => {
            warn!(url = %url, error = %e, elapsed_ms, "Upstream call failed");

            FetchOutcome {
                raw_data: None,
                elapsed_ms,
                http_status: 0,
                error_message: Some(format!("{} (url: {})", e, url)),
                standardized: None,
            }
        }
    }
}

/// Short code for upstream statuses that signal upstream health problems.
pub fn classify_status(status: u16) -> Option<&'static str> {
    match status {
        403 => Some("forbidden"),
        429 => Some("rate_limited"),
        s if s >= 500 => Some("server_error"),
        _ => None,
    }
}

/// Parse a response body as JSON, retrying once with control characters
/// stripped. Bodies that still fail become `{"error": "Invalid JSON", "rawText": ...}`.
pub fn decode_body(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str(text) {
        return value;
    }

    let sanitized = strip_control_chars(text);
    if let Ok(value) = serde_json::from_str(&sanitized) {
        debug!("Parsed upstream body after stripping control characters");
        return value;
    }

    json!({
        "error": "Invalid JSON",
        "rawText": preview(text),
    })
}

/// Remove NUL, C0 and C1 control characters (DEL included).
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| !matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}'))
        .collect()
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let mut head: String = chars.by_ref().take(RAW_TEXT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        head.push_str("...");
    }
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockReply, MockTransport};

    const TIMEOUT: Duration = Duration::from_millis(5000);

    #[test]
    fn test_decode_valid_json() {
        assert_eq!(decode_body(r#"{"country":"US"}"#), json!({"country": "US"}));
    }

    #[test]
    fn test_decode_strips_control_chars() {
        let text = "{\"city\":\"Bei\u{0000}jing\u{0085}\",\u{0001}\"country\":\"CN\"}";
        assert_eq!(
            decode_body(text),
            json!({"city": "Beijing", "country": "CN"})
        );
    }

    #[test]
    fn test_decode_invalid_json() {
        let value = decode_body("<html>blocked</html>");
        assert_eq!(value["error"], "Invalid JSON");
        assert_eq!(value["rawText"], "<html>blocked</html>");
    }

    #[test]
    fn test_decode_empty_body() {
        let value = decode_body("");
        assert_eq!(value["error"], "Invalid JSON");
        assert_eq!(value["rawText"], "");
    }

    #[test]
    fn test_decode_truncates_raw_text() {
        let text = "x".repeat(250);
        let value = decode_body(&text);
        let raw = value["rawText"].as_str().unwrap();
        assert_eq!(raw.len(), 203);
        assert!(raw.ends_with("..."));
    }

    #[test]
    fn test_preview_exact_length_not_marked() {
        let text = "y".repeat(200);
        assert_eq!(preview(&text), text);
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let text = "中".repeat(201);
        let head = preview(&text);
        assert_eq!(head.chars().count(), 203);
        assert!(head.starts_with("中中"));
    }

    #[test]
    fn test_strip_control_chars_keeps_text() {
        assert_eq!(strip_control_chars("a\tb\nc\u{007F}d\u{009F}é"), "abcdé");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(404), None);
        assert_eq!(classify_status(403), Some("forbidden"));
        assert_eq!(classify_status(429), Some("rate_limited"));
        assert_eq!(classify_status(500), Some("server_error"));
        assert_eq!(classify_status(503), Some("server_error"));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let transport = MockTransport::new(MockReply::json(200, r#"{"country":"US"}"#));

        let outcome = fetch_one(&transport, "https://example.com/8.8.8.8", TIMEOUT).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.http_status, 200);
        assert_eq!(outcome.raw_data, Some(json!({"country": "US"})));
        assert!(outcome.standardized.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_invalid_json_is_not_an_error() {
        let transport = MockTransport::new(MockReply::json(200, "not json"));

        let outcome = fetch_one(&transport, "https://example.com", TIMEOUT).await;
        assert_eq!(outcome.http_status, 200);
        assert!(outcome.error_message.is_none());
        assert_eq!(outcome.raw_data.unwrap()["error"], "Invalid JSON");
    }

    #[tokio::test]
    async fn test_fetch_status_overrides_error() {
        for (status, code) in [(403, "forbidden"), (429, "rate_limited"), (502, "server_error")] {
            let transport = MockTransport::new(MockReply::json(status, r#"{"message":"nope"}"#));

            let outcome = fetch_one(&transport, "https://example.com", TIMEOUT).await;
            assert_eq!(outcome.http_status, status);
            assert_eq!(outcome.error_message.as_deref(), Some(code));
            // The body is still reported.
            assert_eq!(outcome.raw_data, Some(json!({"message": "nope"})));
        }
    }

    #[tokio::test]
    async fn test_fetch_transport_error_includes_url() {
        let transport = MockTransport::new(MockReply::Fail("connection refused".to_string()));

        let outcome = fetch_one(&transport, "https://down.example.com/1.1.1.1", TIMEOUT).await;
        assert_eq!(outcome.http_status, 0);
        assert!(outcome.raw_data.is_none());
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("connection refused (url: https://down.example.com/1.1.1.1)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let transport = MockTransport::new(MockReply::Hang);

        let outcome = fetch_one(&transport, "https://slow.example.com", TIMEOUT).await;
        assert_eq!(outcome.http_status, 0);
        assert!(outcome.raw_data.is_none());
        assert_eq!(outcome.elapsed_ms, 5000);
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("request timed out after 5000ms (url: https://slow.example.com)")
        );
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_records_elapsed() {
        let transport = MockTransport::new(MockReply::json(200, "{}"))
            .with_delay(Duration::from_millis(120));

        let outcome = fetch_one(&transport, "https://example.com", TIMEOUT).await;
        assert_eq!(outcome.elapsed_ms, 120);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = FetchOutcome::failure("Unknown source: foo");
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"data": null, "elapsed": 0, "status": 0, "error": "Unknown source: foo"})
        );
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(TIMEOUT).is_ok());
    }
}
