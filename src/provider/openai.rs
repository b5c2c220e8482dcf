use crate::api::{
    ChatMessage, FinishReason, GeneratedImage, GenerationConfig, ImageOptions, Provider, Role,
    TextCompletion, TokenUsage,
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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the [OpenAI API](https://platform.openai.com/docs/api-reference):
/// chat completions (`/chat/completions`, optionally streamed) and image
/// generation (`/images/generations`).
///
/// The only adapter that supports image generation.
pub struct OpenAiAdapter {
    remote: RemoteClient,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            remote: RemoteClient::new(
                api_key,
                base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ),
        }
    }

    /// Build from the relay config; fails when no key is configured.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::from_config(Provider::OpenAi, config, DEFAULT_BASE_URL)?,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .remote
            .client
            .post(self.remote.url(path))
            .bearer_auth(&self.remote.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;
        check_http_status(Provider::OpenAi, response).await
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn message_json(message: &ChatMessage) -> serde_json::Value {
    if message.attachments.is_empty() {
        return json!({ "role": role_name(message.role), "content": message.content });
    }
    let mut parts = vec![json!({ "type": "text", "text": message.content })];
    for attachment in &message.attachments {
        parts.push(json!({ "type": "image_url", "image_url": { "url": attachment.url } }));
    }
    json!({ "role": role_name(message.role), "content": parts })
}

fn build_chat_payload(
    messages: &[ChatMessage],
    config: &GenerationConfig,
    stream: bool,
) -> serde_json::Value {
    let messages: Vec<_> = messages.iter().map(message_json).collect();
    let mut body = json!({
        "model": config.model,
        "messages": messages,
    });

    if let Some(max_tokens) = config.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(presence_penalty) = config.presence_penalty {
        body["presence_penalty"] = json!(presence_penalty);
    }
    if let Some(frequency_penalty) = config.frequency_penalty {
        body["frequency_penalty"] = json!(frequency_penalty);
    }
    if stream {
        body["stream"] = json!(true);
    }
    body
}

fn parse_completion(body: &serde_json::Value) -> Result<TextCompletion> {
    let choice = &body["choices"][0];
    let content = choice["message"]["content"].as_str().ok_or_else(|| {
        GenerationError::fatal(Provider::OpenAi, "Response contained no message content")
    })?;

    let usage = body.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as usize,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as usize,
    });

    Ok(TextCompletion {
        content: content.to_string(),
        usage,
        finish_reason: choice["finish_reason"].as_str().map(FinishReason::from_native),
    })
}

/// Deltas carried by one `chat.completion.chunk` event.
fn parse_stream_event(event: &serde_json::Value) -> Vec<TextDelta> {
    let mut deltas = Vec::new();
    let choice = &event["choices"][0];
    if let Some(text) = choice["delta"]["content"]
        .as_str()
        .filter(|t| !t.is_empty())
    {
        deltas.push(TextDelta::Text(text.to_string()));
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        deltas.push(TextDelta::Finished(FinishReason::from_native(reason)));
    }
    deltas
}

fn build_image_payload(
    prompt: &str,
    config: &GenerationConfig,
    options: &ImageOptions,
) -> serde_json::Value {
    let mut body = json!({
        "model": config.model,
        "prompt": prompt,
        "n": options.n(),
        "size": options.size(),
    });
    // Quality and style are dall-e-3 parameters.
    if config.model == "dall-e-3" {
        body["quality"] = json!(options.quality());
        body["style"] = json!(options.style());
    }
    body
}

fn parse_images(body: &serde_json::Value) -> Result<Vec<GeneratedImage>> {
    let data = body["data"].as_array().ok_or_else(|| {
        GenerationError::fatal(Provider::OpenAi, "Image response contained no data")
    })?;
    Ok(data
        .iter()
        .filter_map(|item| {
            item["url"].as_str().map(|url| GeneratedImage {
                url: url.to_string(),
                revised_prompt: item["revised_prompt"].as_str().map(str::to_string),
            })
        })
        .collect())
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            text: true,
            streaming: true,
            image: true,
        }
    }

    async fn generate_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextCompletion> {
        let payload = build_chat_payload(messages, config, false);
        let response = self.post("chat/completions", &payload).await?;
        let body = read_json(Provider::OpenAi, response).await?;
        parse_completion(&body)
    }

    async fn stream_text(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let payload = build_chat_payload(messages, config, true);
        let response = self.post("chat/completions", &payload).await?;
        let deltas = sse_payloads(Provider::OpenAi, response).flat_map(|payload| {
            let items: Vec<Result<TextDelta>> = match payload
                .and_then(|p| parse_event(Provider::OpenAi, &p))
            {
                Ok(event) => parse_stream_event(&event).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        });
        Ok(deltas.boxed())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        options: &ImageOptions,
    ) -> Result<Vec<GeneratedImage>> {
        if config.model == "dall-e-3" && options.n() > 1 {
            return Err(GenerationError::Validation(
                "dall-e-3 generates exactly one image per request".to_string(),
            ));
        }
        let payload = build_image_payload(prompt, config, options);
        let response = self.post("images/generations", &payload).await?;
        let body = read_json(Provider::OpenAi, response).await?;
        parse_images(&body)
    }
}
