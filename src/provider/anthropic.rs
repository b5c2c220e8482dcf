use crate::api::{
    ChatMessage, FinishReason, GenerationConfig, Provider, Role, TextCompletion, TokenUsage,
    split_system,
};
use crate::config::RelayConfig;
use crate::error::{GenerationError, Result};
use crate::provider::remote_common::{
    RemoteClient, check_http_status, classify_status, parse_event, read_json, sse_payloads,
    transport_error,
};
use crate::traits::{AdapterCapabilities, ProviderAdapter, TextDelta, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the [Anthropic Messages API](https://docs.anthropic.com/en/api/messages).
/// Text generation and streaming only.
///
/// System messages are lifted into the top-level `system` field.
pub struct AnthropicAdapter {
    remote: RemoteClient,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            remote: RemoteClient::new(
                api_key,
                base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::from_config(Provider::Anthropic, config, DEFAULT_BASE_URL)?,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .remote
            .client
            .post(self.remote.url("messages"))
            .header("x-api-key", &self.remote.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;
        check_http_status(Provider::Anthropic, response).await
    }
}

fn message_json(message: &ChatMessage) -> serde_json::Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    if message.attachments.is_empty() {
        return json!({ "role": role, "content": message.content });
    }
    let mut parts: Vec<serde_json::Value> = message
        .attachments
        .iter()
        .map(|a| json!({ "type": "image", "source": { "type": "url", "url": a.url } }))
        .collect();
    parts.push(json!({ "type": "text", "text": message.content }));
    json!({ "role": role, "content": parts })
}

fn build_payload(
    messages: &[ChatMessage],
    config: &GenerationConfig,
    stream: bool,
) -> serde_json::Value {
    let (system, rest) = split_system(messages);
    let messages: Vec<_> = rest.into_iter().map(message_json).collect();

    // max_tokens is mandatory for this API.
    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens.unwrap_or(4096),
    });

    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(top_k) = config.top_k {
        body["top_k"] = json!(top_k);
    }
    if stream {
        body["stream"] = json!(true);
    }
    body
}

fn parse_completion(body: &serde_json::Value) -> Result<TextCompletion> {
    let blocks = body["content"].as_array().ok_or_else(|| {
        GenerationError::fatal(Provider::Anthropic, "Response contained no content blocks")
    })?;
    let content: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    let usage = body.get("usage").map(|u| {
        let prompt = u["input_tokens"].as_u64().unwrap_or(0) as usize;
        let completion = u["output_tokens"].as_u64().unwrap_or(0) as usize;
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    });

    Ok(TextCompletion {
        content,
        usage,
        finish_reason: body["stop_reason"].as_str().map(FinishReason::from_native),
    })
}

/// Interpret one streaming event. `message_start`, `ping` and block
/// boundaries carry nothing the relay needs.
fn parse_stream_event(event: &serde_json::Value) -> Result<Option<TextDelta>> {
    match event["type"].as_str() {
        Some("content_block_delta") => Ok(event["delta"]["text"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(|t| TextDelta::Text(t.to_string()))),
        Some("message_delta") => Ok(event["delta"]["stop_reason"]
            .as_str()
            .map(|r| TextDelta::Finished(FinishReason::from_native(r)))),
        Some("error") => {
            let kind = event["error"]["type"].as_str().unwrap_or_default();
            let status = match kind {
                "overloaded_error" => 529,
                "rate_limit_error" => 429,
                "api_error" => 500,
                _ => 400,
            };
            Err(classify_status(Provider::Anthropic, status, &event.to_string()))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            text: true,
            streaming: true,
            image: false,
        }
    }

    async fn generate_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextCompletion> {
        let payload = build_payload(messages, config, false);
        let response = self.post(&payload).await?;
        let body = read_json(Provider::Anthropic, response).await?;
        parse_completion(&body)
    }

    async fn stream_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let payload = build_payload(messages, config, true);
        let response = self.post(&payload).await?;
        let deltas = sse_payloads(Provider::Anthropic, response).filter_map(|payload| {
            let item = payload
                .and_then(|p| parse_event(Provider::Anthropic, &p))
                .and_then(|event| parse_stream_event(&event))
                .transpose();
            std::future::ready(item)
        });
        Ok(deltas.boxed())
    }
}
