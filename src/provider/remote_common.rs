//! Shared utilities for the HTTP adapters: error classification, API key
//! resolution, and server-sent-event decoding.

use crate::api::Provider;
use crate::config::RelayConfig;
use crate::error::{GenerationError, Result};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;

/// Markers in an error body that indicate quota or capacity pressure even when
/// the status code alone would not.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "insufficient_quota",
    "quota",
    "resource_exhausted",
    "overloaded",
];

/// Longest raw body excerpt carried in an error message.
const MAX_ERROR_BODY: usize = 300;

/// Pull a human-readable message out of a provider error body.
///
/// All three providers use `{"error": {"message": ...}}`; anything else is
/// returned as a truncated excerpt.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &value["error"];
        if let Some(message) = error["message"].as_str() {
            return message.to_string();
        }
        if let Some(message) = error.as_str() {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Map a non-success HTTP status and its body to a classified error.
///
/// 429, quota and overload markers are rate-limit transients; 408 and 5xx
/// (including Anthropic's 529) are plain transients; any other status is
/// fatal.
pub(crate) fn classify_status(provider: Provider, status: u16, body: &str) -> GenerationError {
    let detail = extract_error_message(body);
    let message = format!("HTTP {}: {}", status, detail);
    let lowered = body.to_ascii_lowercase();
    let quota_marker = RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m));

    match status {
        429 => GenerationError::rate_limited(provider, message),
        500..=599 if quota_marker => GenerationError::rate_limited(provider, message),
        408 | 500..=599 => GenerationError::transient(provider, message),
        400..=499 if quota_marker && status != 401 && status != 403 => {
            GenerationError::rate_limited(provider, message)
        }
        _ => GenerationError::fatal(provider, message),
    }
}

/// Classify a transport-level failure. Connection problems and timeouts are
/// transient; everything else (bad URL, undecodable body) is fatal.
pub(crate) fn transport_error(provider: Provider, error: reqwest::Error) -> GenerationError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        GenerationError::transient(provider, error.to_string())
    } else {
        GenerationError::fatal(provider, error.to_string())
    }
}

/// Return the response when it is 2xx, otherwise a classified error carrying
/// the upstream message.
pub(crate) async fn check_http_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status.as_u16(), &body))
}

/// Decode a success body as JSON; a malformed body is fatal.
pub(crate) async fn read_json(
    provider: Provider,
    response: reqwest::Response,
) -> Result<serde_json::Value> {
    response
        .json()
        .await
        .map_err(|e| GenerationError::fatal(provider, format!("Malformed response body: {}", e)))
}

/// HTTP client, credentials, and base URL shared by one adapter.
#[derive(Clone)]
pub(crate) struct RemoteClient {
    pub(crate) client: Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl RemoteClient {
    pub(crate) fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve key and base URL for `provider` from the relay config.
    pub(crate) fn from_config(
        provider: Provider,
        config: &RelayConfig,
        default_base_url: &str,
    ) -> Result<Self> {
        let api_key = config.api_key(provider)?;
        let base_url = config
            .settings(provider)
            .base_url
            .unwrap_or_else(|| default_base_url.to_string());
        Ok(Self::new(api_key, base_url))
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// What one SSE line means to a consumer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Data(String),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, `event:` and `id:` lines, and frame separators.
        return SseLine::Skip;
    };
    let payload = payload.trim();
    match payload {
        "" => SseLine::Skip,
        "[DONE]" => SseLine::Done,
        data => SseLine::Data(data.to_string()),
    }
}

/// Turn a chunked byte stream into the `data:` payloads it carries.
///
/// Chunks may split lines (and multi-byte characters) anywhere; bytes are
/// buffered until a full line is available. The stream ends at `[DONE]`, at
/// end of input, or after the first error.
pub(crate) fn decode_sse<S, B>(chunks: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (chunks.boxed(), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut chunks, mut buf, finished)| async move {
        if finished {
            return None;
        }
        loop {
            if let Some(idx) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=idx).collect();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    SseLine::Data(data) => return Some((Ok(data), (chunks, buf, false))),
                    SseLine::Done => return None,
                    SseLine::Skip => continue,
                }
            }
            match chunks.next().await {
                Some(Ok(bytes)) => buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => return Some((Err(e), (chunks, buf, true))),
                None => {
                    let rest = String::from_utf8_lossy(&buf).into_owned();
                    return match parse_sse_line(&rest) {
                        SseLine::Data(data) => Some((Ok(data), (chunks, Vec::new(), true))),
                        _ => None,
                    };
                }
            }
        }
    })
    .boxed()
}

/// SSE payloads of a streaming HTTP response.
pub(crate) fn sse_payloads(
    provider: Provider,
    response: reqwest::Response,
) -> BoxStream<'static, Result<String>> {
    let chunks = response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| transport_error(provider, e)));
    decode_sse(chunks)
}

/// Parse one SSE payload as JSON; a malformed event is fatal.
pub(crate) fn parse_event(provider: Provider, payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload)
        .map_err(|e| GenerationError::fatal(provider, format!("Malformed stream event: {}", e)))
}
