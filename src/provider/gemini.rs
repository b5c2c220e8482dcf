use crate::api::{
    ChatMessage, FinishReason, GenerationConfig, Provider, Role, TextCompletion, TokenUsage,
    split_system,
};
use crate::config::RelayConfig;
use crate::error::{GenerationError, Result};
use crate::provider::remote_common::{
    RemoteClient, check_http_status, parse_event, read_json, sse_payloads, transport_error,
};
use crate::traits::{AdapterCapabilities, ProviderAdapter, TextDelta, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the [Gemini API](https://ai.google.dev/api/generate-content)
/// (`generateContent` / `streamGenerateContent`). Text generation and
/// streaming only.
pub struct GeminiAdapter {
    remote: RemoteClient,
}

impl GeminiAdapter {
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
            remote: RemoteClient::from_config(Provider::Google, config, DEFAULT_BASE_URL)?,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .remote
            .client
            .post(self.remote.url(path))
            .header("x-goog-api-key", &self.remote.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Google, e))?;
        check_http_status(Provider::Google, response).await
    }
}

fn content_json(message: &ChatMessage) -> serde_json::Value {
    let role = match message.role {
        Role::Assistant => "model",
        _ => "user",
    };
    let mut parts = vec![json!({ "text": message.content })];
    for attachment in &message.attachments {
        parts.push(json!({
            "fileData": { "mimeType": attachment.mime_type, "fileUri": attachment.url }
        }));
    }
    json!({ "role": role, "parts": parts })
}

fn build_payload(messages: &[ChatMessage], config: &GenerationConfig) -> serde_json::Value {
    let (system, rest) = split_system(messages);
    let contents: Vec<_> = rest.into_iter().map(content_json).collect();

    let mut generation_config = json!({});
    if let Some(max_tokens) = config.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = config.top_p {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(top_k) = config.top_k {
        generation_config["topK"] = json!(top_k);
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

/// Text, finish reason, and usage of one `GenerateContentResponse`; the
/// streaming endpoint sends a sequence of these.
fn parse_response(body: &serde_json::Value) -> Result<TextCompletion> {
    if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::fatal(
            Provider::Google,
            format!("Prompt blocked: {}", reason),
        ));
    }

    let candidate = &body["candidates"][0];
    let content: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    let usage = body.get("usageMetadata").map(|u| TokenUsage {
        prompt_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as usize,
        completion_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        total_tokens: u["totalTokenCount"].as_u64().unwrap_or(0) as usize,
    });

    Ok(TextCompletion {
        content,
        usage,
        finish_reason: candidate["finishReason"]
            .as_str()
            .map(FinishReason::from_native),
    })
}

fn stream_deltas(event: &serde_json::Value) -> Result<Vec<TextDelta>> {
    let chunk = parse_response(event)?;
    let mut deltas = Vec::new();
    if !chunk.content.is_empty() {
        deltas.push(TextDelta::Text(chunk.content));
    }
    if let Some(reason) = chunk.finish_reason {
        deltas.push(TextDelta::Finished(reason));
    }
    Ok(deltas)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
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
        let payload = build_payload(messages, config);
        let path = format!("models/{}:generateContent", config.model);
        let response = self.post(&path, &payload).await?;
        let body = read_json(Provider::Google, response).await?;
        let completion = parse_response(&body)?;
        if completion.content.is_empty() && body["candidates"].as_array().is_none_or(Vec::is_empty)
        {
            return Err(GenerationError::fatal(
                Provider::Google,
                "Response contained no candidates",
            ));
        }
        Ok(completion)
    }

    async fn stream_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let payload = build_payload(messages, config);
        let path = format!("models/{}:streamGenerateContent?alt=sse", config.model);
        let response = self.post(&path, &payload).await?;
        let deltas = sse_payloads(Provider::Google, response).flat_map(|payload| {
            let items: Vec<Result<TextDelta>> = match payload
                .and_then(|p| parse_event(Provider::Google, &p))
                .and_then(|event| stream_deltas(&event))
            {
                Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        });
        Ok(deltas.boxed())
    }
}
