//! Public API types: providers, requests, results, and retry policy.

use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// An upstream model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(alias = "gemini")]
    Google,
}

impl Provider {
    /// Every provider the relay knows how to talk to.
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(GenerationError::Validation(format!(
                "Unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A file referenced by a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Publicly reachable URL of the file.
    pub url: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

impl Attachment {
    pub fn image(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// One role-tagged message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Concatenate system messages into a single instruction block.
///
/// Anthropic and Gemini take the system prompt outside the message list.
pub(crate) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages.iter().filter(|m| m.role != Role::System).collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

/// Fallback sampling values used when a request leaves a field unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
}

impl ProviderDefaults {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => Self {
                max_tokens: 4096,
                temperature: 0.7,
                top_p: 1.0,
                top_k: None,
                presence_penalty: Some(0.0),
                frequency_penalty: Some(0.0),
            },
            Provider::Anthropic => Self {
                max_tokens: 4096,
                temperature: 0.7,
                top_p: 1.0,
                top_k: Some(40),
                presence_penalty: None,
                frequency_penalty: None,
            },
            Provider::Google => Self {
                max_tokens: 8192,
                temperature: 0.7,
                top_p: 0.95,
                top_k: Some(40),
                presence_penalty: None,
                frequency_penalty: None,
            },
        }
    }
}

/// Target model and sampling parameters of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl GenerationConfig {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    pub fn candidate(&self) -> Candidate {
        Candidate::new(self.provider, self.model.clone())
    }

    /// Retarget this config at `candidate`, keeping explicit sampling values
    /// and filling the rest from that provider's defaults.
    pub fn for_candidate(&self, candidate: &Candidate) -> Self {
        let mut config = self.clone();
        config.provider = candidate.provider;
        config.model = candidate.model.clone();
        config.with_defaults()
    }

    /// Fill unset numeric fields from [`ProviderDefaults`].
    pub fn with_defaults(mut self) -> Self {
        let defaults = ProviderDefaults::for_provider(self.provider);
        self.max_tokens = self.max_tokens.or(Some(defaults.max_tokens));
        self.temperature = self.temperature.or(Some(defaults.temperature));
        self.top_p = self.top_p.or(Some(defaults.top_p));
        self.top_k = self.top_k.or(defaults.top_k);
        self.presence_penalty = self.presence_penalty.or(defaults.presence_penalty);
        self.frequency_penalty = self.frequency_penalty.or(defaults.frequency_penalty);
        self
    }
}

/// A chat turn submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub config: GenerationConfig,
    /// Authenticated caller identity, used only for the credit check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>, config: GenerationConfig) -> Self {
        Self {
            messages,
            config,
            caller: None,
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Image-specific knobs of an [`ImageGenerationRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl ImageOptions {
    pub const DEFAULT_SIZE: &'static str = "1024x1024";
    pub const DEFAULT_QUALITY: &'static str = "standard";
    pub const DEFAULT_STYLE: &'static str = "vivid";
    pub const MAX_IMAGES: u32 = 4;

    pub fn size(&self) -> &str {
        self.size.as_deref().unwrap_or(Self::DEFAULT_SIZE)
    }

    pub fn quality(&self) -> &str {
        self.quality.as_deref().unwrap_or(Self::DEFAULT_QUALITY)
    }

    pub fn style(&self) -> &str {
        self.style.as_deref().unwrap_or(Self::DEFAULT_STYLE)
    }

    pub fn n(&self) -> u32 {
        self.n.unwrap_or(1)
    }
}

/// A prompt for the image model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    pub config: GenerationConfig,
    #[serde(default)]
    pub options: ImageOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// A concrete `(provider, model)` pair considered for serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: Provider,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Token counts for a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Normalise a provider-native stop reason.
    pub fn from_native(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "STOP" => Self::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => Self::Length,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The provider-level output of a text generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
}

/// The outcome of a generation, including which candidate actually served it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// May differ from the requested candidate when fallback occurred.
    pub served_by: Candidate,
}

impl GenerationResult {
    pub(crate) fn from_completion(completion: TextCompletion, served_by: Candidate) -> Self {
        Self {
            content: completion.content,
            usage: completion.usage,
            finish_reason: completion.finish_reason,
            served_by,
        }
    }
}

/// One generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// The outcome of an image generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    pub images: Vec<GeneratedImage>,
    pub served_by: Candidate,
}

/// Bounded exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial call).
    pub max_attempts: u32,
    /// Base delay in milliseconds; doubled on each subsequent attempt.
    pub base_delay_ms: u64,
    /// Upper bound (exclusive) of the random delay added to each backoff.
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Backoff before retrying after the 1-based `attempt` failed:
    /// `base_delay_ms * 2^(attempt - 1) + jitter`, saturating.
    pub fn backoff(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .saturating_add(jitter_ms),
        )
    }

    /// A policy that never waits, for tests and latency-sensitive callers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            jitter_ms: 1000,
        }
    }
}
